//! 存储模块
//! Store module
//!
//! 定义了命令持久化后端的抽象层
//! Defines the abstraction layer for the command persistence backend

use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;

pub mod constants;

/// 存储事务句柄
/// Store transaction handle
///
/// 由 [`CommandStore::begin`] 创建；在提交前，所有通过该句柄的写入对其他读者不可见
/// Created by [`CommandStore::begin`]; writes made through it stay invisible to other readers until commit
#[async_trait]
pub trait StoreTransaction: Send + Sync {
  /// 事务 ID，用于日志
  /// Transaction id, used for logging
  fn id(&self) -> &str;

  /// 供具体存储向下转型
  /// Lets a concrete store downcast back to its own transaction type
  fn as_any(&self) -> &dyn Any;

  /// 提交事务
  /// Commit the transaction
  async fn commit(self: Box<Self>) -> Result<()>;

  /// 回滚事务
  /// Roll back the transaction
  async fn rollback(self: Box<Self>) -> Result<()>;
}

/// 命令存储特性，定义了与持久化后端交互的接口
/// Command store trait, defines the interface for interacting with the persistence backend
#[async_trait]
pub trait CommandStore: Send + Sync {
  /// 开启事务
  /// Begin a transaction
  async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

  /// 插入新命令并返回分配的 ID
  /// Insert a new command and return the assigned id
  ///
  /// 已带 ID 的记录按原 ID 插入，ID 冲突时返回错误
  /// A record that already carries an id keeps it; a clash is an error
  async fn create_command(
    &self,
    command: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<String>;

  /// 部分更新命令
  /// Partially update a command
  async fn update_command(
    &self,
    id: &str,
    update: &CommandUpdate,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()>;

  /// 按名称删除命令，返回删除数量
  /// Delete commands by name, returning how many were removed
  async fn destroy_command(&self, name: &str) -> Result<u64>;

  /// 按状态查询命令，排除指定名称
  /// Query commands by status, excluding the given names
  async fn get_commands_with_status(
    &self,
    statuses: &[CommandStatus],
    excluded_names: &[String],
  ) -> Result<Vec<Command>>;

  /// 按 ID 查询命令
  /// Query a command by id
  async fn get_command_with_id(&self, id: &str) -> Result<Option<Command>>;

  /// 删除早于 `before` 的终止命令，最多 `limit` 条
  /// Remove up to `limit` finalized commands older than `before`
  async fn remove_finalized_commands(&self, before: i64, limit: usize) -> Result<u64>;
}
