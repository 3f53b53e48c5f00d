//! 执行器的持久化辅助
//! Persistence helpers of the executor

use tracing::debug;

use super::delay::now_millis;
use super::ExecutorInner;
use crate::base::StoreTransaction;
use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::error::{Error, Result};

impl ExecutorInner {
  /// 插入新命令记录
  /// Insert a new command record
  ///
  /// 总是创建新记录：丢弃原有 ID，状态重置为 PENDING
  /// Always creates a fresh record: any carried id is dropped and the status reset to PENDING
  ///
  /// 名称为空时取序列头部；`ready_at` 缺省为当前时间；数据由所属处理器打包
  /// An empty name is taken from the head of the sequence; `ready_at` defaults to now; data is packed by the owning handler
  pub(crate) async fn insert(
    &self,
    mut command: Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<Command> {
    command.id = None;
    command.status = CommandStatus::Pending;
    command.started_at = None;
    command.message = None;
    if command.name.is_empty() {
      let (name, tail) = command
        .sequence
        .pop_front()
        .ok_or_else(|| Error::other("command has neither a name nor a sequence"))?;
      command.name = name;
      command.sequence = tail;
    }
    if command.ready_at.is_none() {
      command.ready_at = Some(now_millis());
    }
    if let Some(handler) = self.resolver.resolve(&command.name) {
      command.data = handler.pack(command.data)?;
    }
    let id = self.store.create_command(&command, tx).await?;
    command.id = Some(id);
    if self.config.verbose_logging {
      debug!(command = %command.name, command_id = %command.id_or_dash(), "Command inserted");
    }
    Ok(command)
  }

  /// 写入部分更新，并同步到内存中的命令
  /// Persist a partial update and mirror it onto the in-memory command
  pub(crate) async fn update(
    &self,
    command: &mut Command,
    update: CommandUpdate,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()> {
    let id = command.persisted_id()?.to_string();
    self.store.update_command(&id, &update, tx).await?;
    command.apply(&update);
    Ok(())
  }

  /// 仅更新状态
  /// Update the status only
  pub(crate) async fn set_status(
    &self,
    command: &mut Command,
    status: CommandStatus,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()> {
    self.update(command, CommandUpdate::status(status), tx).await
  }
}
