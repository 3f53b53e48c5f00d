//! 错误处理模块
//! Error handling module
//!
//! 定义了 cmdq 中使用的各种错误类型
//! Defines various error types used in cmdq

use thiserror::Error;

/// cmdq 的结果类型
/// Result type for cmdq
pub type Result<T> = std::result::Result<T, Error>;

/// cmdq 错误类型
/// cmdq error type
#[derive(Error, Debug)]
pub enum Error {
  #[cfg(feature = "postgres")]
  /// SeaORM 数据库错误
  /// SeaORM database error
  #[error("SeaORM database error: {0}")]
  SeaOrm(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 命令名称无法解析为处理器
  /// Command name does not resolve to a handler
  #[error("Unresolved command: {name}")]
  UnresolvedCommand { name: String },

  /// 命令未找到错误
  /// Command not found error
  #[error("Command not found: {id}")]
  CommandNotFound { id: String },

  /// 命令 ID 冲突错误
  /// Command ID conflict error
  #[error("Command ID conflicts with another command: {id}")]
  CommandIdConflict { id: String },

  /// 命令记录缺少 ID（尚未持久化）
  /// Command record has no id (not persisted yet)
  #[error("Command {name} has not been persisted")]
  NotPersisted { name: String },

  /// 处理器执行错误
  /// Error raised by a handler while executing a command
  #[error("Execution error: {0}")]
  Execution(String),

  /// 存储事务错误
  /// Storage transaction error
  #[error("Transaction error: {0}")]
  Transaction(String),

  /// 存储错误
  /// Store error
  #[error("Store error: {0}")]
  Store(String),

  /// 调度器自身簿记故障，不可重试
  /// Fault in the scheduler's own bookkeeping, never retried
  #[error("Scheduler fault: {0}")]
  SchedulerFault(String),

  /// 执行器已关闭
  /// Executor closed
  #[error("Executor closed")]
  ExecutorClosed,

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建执行错误
  /// Create an execution error
  pub fn execution<S: Into<String>>(message: S) -> Self {
    Self::Execution(message.into())
  }

  /// 创建事务错误
  /// Create a transaction error
  pub fn transaction<S: Into<String>>(message: S) -> Self {
    Self::Transaction(message.into())
  }

  /// 创建存储错误
  /// Create a store error
  pub fn store<S: Into<String>>(message: S) -> Self {
    Self::Store(message.into())
  }

  /// 创建调度器故障
  /// Create a scheduler fault
  pub fn fault<S: Into<String>>(message: S) -> Self {
    Self::SchedulerFault(message.into())
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 检查是否可以按重试预算重试
  /// Check if the error is retried against the retry budget
  ///
  /// 处理器抛出的错误都会被重试；只有调度器自身的故障和配置错误不会
  /// Everything a handler raises is retried; only scheduler faults and configuration errors are not
  pub fn is_retriable(&self) -> bool {
    match self {
      Error::SchedulerFault(_) | Error::Config { .. } | Error::ExecutorClosed => false,
      Error::UnresolvedCommand { .. } => false,
      Error::Serialization(_)
      | Error::CommandNotFound { .. }
      | Error::CommandIdConflict { .. }
      | Error::NotPersisted { .. }
      | Error::Execution(_)
      | Error::Transaction(_)
      | Error::Store(_)
      | Error::Io(_)
      | Error::Other { .. } => true,
      #[cfg(feature = "postgres")]
      Error::SeaOrm(_) => true,
    }
  }

  /// 检查是否为致命错误
  /// Check if the error is fatal
  pub fn is_fatal(&self) -> bool {
    matches!(self, Error::SchedulerFault(_))
  }

  /// 将存储错误升级为调度器故障
  /// Escalate an error raised during bookkeeping into a scheduler fault
  pub(crate) fn into_fault(self, context: &str) -> Self {
    match self {
      Error::SchedulerFault(_) => self,
      other => Error::SchedulerFault(format!("{context}: {other}")),
    }
  }
}
