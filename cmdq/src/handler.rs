//! 命令处理器模块
//! Command handler module
//!
//! 定义了每种命令必须实现的协议，以及处理器执行时可用的上下文
//! Defines the protocol every command kind implements and the context a handler runs with

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::base::{CommandStore, StoreTransaction};
use crate::command::{merge_data, Command, CommandOptions, Outcome, Sequence};
use crate::error::{Error, Result};
use crate::operation::OperationTracker;
use crate::resolver::CommandResolver;

/// 命令处理器特性
/// Command handler trait
///
/// 一个处理器对应一个命令名称；名称取自 [`CommandHandler::defaults`]
/// One handler serves one command name, taken from [`CommandHandler::defaults`]
#[async_trait]
pub trait CommandHandler: Send + Sync {
  /// 默认命令：规范名称、初始数据、周期、事务标志与重试预算
  /// Default command: canonical name, initial data, period, transactional flag and retry budget
  fn defaults(&self) -> Command;

  /// 执行命令
  /// Execute the command
  ///
  /// `command.data` 已经过 [`CommandHandler::unpack`]；对它的修改会在 Repeat 或 Retry 时被重新打包持久化
  /// `command.data` has been through [`CommandHandler::unpack`]; changes are re-packed and persisted on Repeat or Retry
  async fn execute(&self, command: &mut Command, ctx: &CommandContext<'_>) -> Result<Outcome>;

  /// 重试耗尽后的恢复
  /// Recovery once the retry budget is exhausted
  async fn recover(
    &self,
    command: &Command,
    err: &Error,
    ctx: &CommandContext<'_>,
  ) -> Result<Outcome> {
    let operation_id = command.data.get("operationId").and_then(Value::as_str);
    warn!(
      command = %command.name,
      command_id = %command.id_or_dash(),
      operation_id = ?operation_id,
      "Command failed: {}",
      err
    );
    if let (Some(operation_id), Some(operations)) = (operation_id, ctx.operations()) {
      operations.mark_failed(operation_id, &err.to_string()).await?;
    }
    Ok(Outcome::Empty)
  }

  /// 截止时间已过
  /// Deadline passed before dispatch
  async fn expired(&self, _command: &Command, _ctx: &CommandContext<'_>) -> Result<Outcome> {
    Ok(Outcome::Empty)
  }

  /// 工作数据转换为持久化数据
  /// Working data to persisted data
  fn pack(&self, data: Value) -> Result<Value> {
    Ok(data)
  }

  /// 持久化数据转换为工作数据
  /// Persisted data to working data
  fn unpack(&self, data: Value) -> Result<Value> {
    Ok(data)
  }

  /// 重试预算耗尽
  /// Retry budget exhausted
  async fn retry_finished(&self, command: &Command) {
    debug!(
      command = %command.name,
      command_id = %command.id_or_dash(),
      "Max retry count for command reached"
    );
  }
}

/// 处理器执行上下文
/// Context a handler executes with
///
/// 处理器通过上下文访问注册表、存储和当前事务，而不持有对注册表的引用
/// Handlers reach the registry, the store and the open transaction through here instead of holding references to them
#[derive(Clone, Copy)]
pub struct CommandContext<'a> {
  resolver: &'a CommandResolver,
  store: &'a dyn CommandStore,
  transaction: Option<&'a dyn StoreTransaction>,
  operations: Option<&'a dyn OperationTracker>,
}

impl<'a> CommandContext<'a> {
  pub fn new(resolver: &'a CommandResolver, store: &'a dyn CommandStore) -> Self {
    Self {
      resolver,
      store,
      transaction: None,
      operations: None,
    }
  }

  pub fn with_transaction(mut self, transaction: Option<&'a dyn StoreTransaction>) -> Self {
    self.transaction = transaction;
    self
  }

  pub fn with_operations(mut self, operations: Option<&'a dyn OperationTracker>) -> Self {
    self.operations = operations;
    self
  }

  pub fn resolver(&self) -> &'a CommandResolver {
    self.resolver
  }

  pub fn store(&self) -> &'a dyn CommandStore {
    self.store
  }

  /// 当前事务，仅事务性命令存在
  /// The open transaction, present only for transactional commands
  pub fn transaction(&self) -> Option<&'a dyn StoreTransaction> {
    self.transaction
  }

  pub fn operations(&self) -> Option<&'a dyn OperationTracker> {
    self.operations
  }

  /// 继续工作流：弹出下一个命令名称并构建为唯一的子命令
  /// Continue a workflow: pop the next name and build it as the single child
  ///
  /// 序列为空或缺失时返回 [`Outcome::Empty`]
  /// Returns [`Outcome::Empty`] when the sequence is empty or absent
  pub fn continue_sequence(
    &self,
    data: Value,
    sequence: Option<&Sequence>,
    opts: Option<CommandOptions>,
  ) -> Result<Outcome> {
    let Some((name, tail)) = sequence.and_then(Sequence::pop_front) else {
      return Ok(Outcome::Empty);
    };
    let command = self.build(&name, data, tail, opts)?;
    Ok(Outcome::Commands(vec![command]))
  }

  /// 基于处理器默认值构建命令
  /// Build a command on top of its handler's defaults
  pub fn build(
    &self,
    name: &str,
    data: Value,
    sequence: Sequence,
    opts: Option<CommandOptions>,
  ) -> Result<Command> {
    let handler = self
      .resolver
      .resolve(name)
      .ok_or_else(|| Error::UnresolvedCommand {
        name: name.to_string(),
      })?;
    let mut command = handler.defaults();
    command.name = name.to_string();
    command.data = merge_data(command.data, data);
    command.sequence = sequence;
    if let Some(opts) = opts {
      command.apply_options(&opts);
    }
    Ok(command)
  }
}
