//! 操作 ID 清理器
//! Operation id cleaner
//!
//! 永久命令：定期删除超过保留时间的操作状态
//! Permanent command that periodically drops operation status past its retention window

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cleaner::CleanerData;
use crate::base::constants::{
  OPERATION_IDS_CLEANUP_BATCH, OPERATION_IDS_CLEANUP_TIME, OPERATION_ID_CLEANER_COMMAND,
};
use crate::command::{Command, Outcome};
use crate::error::{Error, Result};
use crate::executor::delay::now_millis;
use crate::handler::{CommandContext, CommandHandler};

/// 操作 ID 清理器
/// Operation id cleaner
#[derive(Debug, Clone)]
pub struct OperationIdCleanerCommand {
  period: Duration,
  data: CleanerData,
}

impl Default for OperationIdCleanerCommand {
  fn default() -> Self {
    Self::new()
  }
}

impl OperationIdCleanerCommand {
  pub fn new() -> Self {
    Self {
      period: OPERATION_IDS_CLEANUP_TIME,
      data: CleanerData {
        retention_millis: OPERATION_IDS_CLEANUP_TIME.as_millis() as u64,
        batch_size: OPERATION_IDS_CLEANUP_BATCH,
      },
    }
  }

  pub fn period(mut self, period: Duration) -> Self {
    self.period = period;
    self
  }

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
impl CommandHandler for OperationIdCleanerCommand {
  fn defaults(&self) -> Command {
    Command::new(OPERATION_ID_CLEANER_COMMAND)
      .with_data(serde_json::to_value(&self.data).unwrap_or_default())
      .with_period(self.period)
  }

  fn unpack(&self, data: serde_json::Value) -> Result<serde_json::Value> {
    let parsed: CleanerData = serde_json::from_value(data)?;
    if parsed.batch_size == 0 {
      return Err(Error::execution("batchSize must be greater than 0"));
    }
    Ok(serde_json::to_value(parsed)?)
  }

  async fn execute(&self, command: &mut Command, ctx: &CommandContext<'_>) -> Result<Outcome> {
    let Some(operations) = ctx.operations() else {
      debug!("No operation tracker configured, nothing to clean");
      return Ok(Outcome::Repeat);
    };
    let data: CleanerData = serde_json::from_value(command.data.clone())?;
    let retention = i64::try_from(data.retention_millis).unwrap_or(i64::MAX);
    let before = now_millis().saturating_sub(retention);

    let mut total = 0u64;
    loop {
      let removed = operations.remove_before(before, data.batch_size).await?;
      total += removed;
      if removed < data.batch_size as u64 {
        break;
      }
    }

    if total > 0 {
      info!(removed = total, "Removed expired operation ids");
    }
    Ok(Outcome::Repeat)
  }

  async fn recover(
    &self,
    command: &Command,
    err: &Error,
    _ctx: &CommandContext<'_>,
  ) -> Result<Outcome> {
    warn!(command_id = %command.id_or_dash(), "Failed to clean operation ids: {}", err);
    Ok(Outcome::Repeat)
  }
}
