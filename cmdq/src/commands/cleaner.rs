//! 命令清理器
//! Commands cleaner
//!
//! 永久命令：定期删除超过保留时间的终止命令
//! Permanent command that periodically removes finalized commands past their retention window

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::base::constants::{
  COMMANDS_CLEANER_COMMAND, FINALIZED_COMMAND_CLEANUP_BATCH, FINALIZED_COMMAND_CLEANUP_TIME,
};
use crate::command::{Command, Outcome};
use crate::error::{Error, Result};
use crate::executor::delay::now_millis;
use crate::handler::{CommandContext, CommandHandler};

/// 清理器数据
/// Cleaner data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanerData {
  /// 保留时间（毫秒）
  /// Retention window, milliseconds
  pub retention_millis: u64,
  /// 每批删除数量
  /// Records removed per batch
  pub batch_size: usize,
}

impl Default for CleanerData {
  fn default() -> Self {
    Self {
      retention_millis: FINALIZED_COMMAND_CLEANUP_TIME.as_millis() as u64,
      batch_size: FINALIZED_COMMAND_CLEANUP_BATCH,
    }
  }
}

/// 命令清理器
/// Commands cleaner
#[derive(Debug, Clone)]
pub struct CommandsCleanerCommand {
  period: Duration,
  data: CleanerData,
}

impl Default for CommandsCleanerCommand {
  fn default() -> Self {
    Self::new()
  }
}

impl CommandsCleanerCommand {
  pub fn new() -> Self {
    Self {
      period: FINALIZED_COMMAND_CLEANUP_TIME,
      data: CleanerData::default(),
    }
  }

  /// 设置执行周期
  /// Set the run period
  pub fn period(mut self, period: Duration) -> Self {
    self.period = period;
    self
  }

  /// 设置保留时间
  /// Set the retention window
  pub fn retention(mut self, retention: Duration) -> Self {
    self.data.retention_millis = retention.as_millis() as u64;
    self
  }

  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.data.batch_size = batch_size.max(1);
    self
  }
}

#[async_trait]
impl CommandHandler for CommandsCleanerCommand {
  fn defaults(&self) -> Command {
    Command::new(COMMANDS_CLEANER_COMMAND)
      .with_data(serde_json::to_value(&self.data).unwrap_or_default())
      .with_period(self.period)
  }

  /// 校验数据形状
  /// Validate the data shape
  fn unpack(&self, data: serde_json::Value) -> Result<serde_json::Value> {
    let parsed: CleanerData = serde_json::from_value(data)?;
    if parsed.batch_size == 0 {
      return Err(Error::execution("batchSize must be greater than 0"));
    }
    Ok(serde_json::to_value(parsed)?)
  }

  async fn execute(&self, command: &mut Command, ctx: &CommandContext<'_>) -> Result<Outcome> {
    let data: CleanerData = serde_json::from_value(command.data.clone())?;
    let retention = i64::try_from(data.retention_millis).unwrap_or(i64::MAX);
    let before = now_millis().saturating_sub(retention);

    let mut total = 0u64;
    loop {
      let removed = ctx
        .store()
        .remove_finalized_commands(before, data.batch_size)
        .await?;
      total += removed;
      if removed < data.batch_size as u64 {
        break;
      }
    }

    if total > 0 {
      info!(removed = total, "Removed finalized commands");
    } else {
      debug!("No finalized commands to remove");
    }
    Ok(Outcome::Repeat)
  }

  async fn recover(
    &self,
    command: &Command,
    err: &Error,
    _ctx: &CommandContext<'_>,
  ) -> Result<Outcome> {
    warn!(command_id = %command.id_or_dash(), "Failed to clean finalized commands: {}", err);
    Ok(Outcome::Repeat)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::base::CommandStore;
  use crate::command::CommandStatus;
  use crate::memdb::MemoryCommandStore;
  use crate::resolver::CommandResolver;
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn test_defaults() {
    let command = CommandsCleanerCommand::new().defaults();
    assert_eq!(command.name, "commandsCleanerCommand");
    assert_eq!(command.period, Some(24 * 60 * 60 * 1000));
    assert_eq!(command.data["retentionMillis"], json!(86_400_000u64));
    assert_eq!(command.data["batchSize"], json!(1000));
  }

  #[test]
  fn test_unpack_rejects_malformed_data() {
    let cleaner = CommandsCleanerCommand::new();
    assert!(cleaner.unpack(json!({"retentionMillis": "soon"})).is_err());
    assert!(cleaner
      .unpack(json!({"retentionMillis": 1, "batchSize": 0}))
      .is_err());
    assert!(cleaner
      .unpack(json!({"retentionMillis": 1, "batchSize": 2}))
      .is_ok());
  }

  #[tokio::test]
  async fn test_execute_removes_in_batches() {
    let store = MemoryCommandStore::new();
    let old = now_millis() - 10_000;
    for i in 0..5 {
      let mut command = Command::new(format!("done-{i}"));
      command.status = CommandStatus::Completed;
      command.started_at = Some(old);
      store.create_command(&command, None).await.unwrap();
    }
    let mut fresh = Command::new("fresh");
    fresh.status = CommandStatus::Completed;
    fresh.started_at = Some(now_millis() + 60_000);
    store.create_command(&fresh, None).await.unwrap();
    store
      .create_command(&Command::new("pending"), None)
      .await
      .unwrap();

    let cleaner = Arc::new(
      CommandsCleanerCommand::new()
        .retention(Duration::from_secs(1))
        .batch_size(2),
    );
    let mut resolver = CommandResolver::new();
    resolver.register(cleaner.clone());
    let ctx = CommandContext::new(&resolver, &store);

    let mut command = cleaner.defaults();
    let outcome = cleaner.execute(&mut command, &ctx).await.unwrap();
    assert_eq!(outcome, Outcome::Repeat);
    assert_eq!(store.len().await, 2);
  }
}
