//! 操作状态模块
//! Operation status module
//!
//! 将命令失败汇总为面向用户的操作状态
//! Aggregates command failures into user-facing operation status

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::executor::delay::now_millis;

/// 操作状态
/// Operation status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
  InProgress,
  Completed,
  Failed { message: String },
}

/// 操作跟踪器
/// Operation tracker
#[async_trait]
pub trait OperationTracker: Send + Sync {
  /// 将操作标记为失败
  /// Mark an operation as failed
  async fn mark_failed(&self, operation_id: &str, message: &str) -> Result<()>;

  /// 查询操作状态
  /// Look up an operation's status
  async fn status(&self, operation_id: &str) -> Result<Option<OperationStatus>>;

  /// 删除最后更新早于 `before` 的操作，最多 `limit` 条，返回删除数量
  /// Remove up to `limit` operations last updated before `before`, returning how many were removed
  async fn remove_before(&self, before: i64, limit: usize) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct OperationEntry {
  status: OperationStatus,
  updated_at: i64,
}

/// 内存操作跟踪器
/// In-memory operation tracker
#[derive(Debug, Default)]
pub struct MemoryOperationTracker {
  operations: RwLock<HashMap<String, OperationEntry>>,
}

impl MemoryOperationTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// 登记一个进行中的操作
  /// Register an operation as in progress
  pub fn start(&self, operation_id: &str) -> Result<()> {
    self.record(operation_id, OperationStatus::InProgress, now_millis())
  }

  /// 标记操作完成
  /// Mark an operation as completed
  pub fn complete(&self, operation_id: &str) -> Result<()> {
    self.record(operation_id, OperationStatus::Completed, now_millis())
  }

  pub fn len(&self) -> usize {
    self
      .operations
      .read()
      .map(|operations| operations.len())
      .unwrap_or_default()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub(crate) fn record(
    &self,
    operation_id: &str,
    status: OperationStatus,
    updated_at: i64,
  ) -> Result<()> {
    let mut operations = self
      .operations
      .write()
      .map_err(|e| Error::other(format!("operation lock poisoned: {e}")))?;
    operations.insert(
      operation_id.to_string(),
      OperationEntry { status, updated_at },
    );
    Ok(())
  }
}

#[async_trait]
impl OperationTracker for MemoryOperationTracker {
  async fn mark_failed(&self, operation_id: &str, message: &str) -> Result<()> {
    let status = OperationStatus::Failed {
      message: message.to_string(),
    };
    self.record(operation_id, status, now_millis())
  }

  async fn status(&self, operation_id: &str) -> Result<Option<OperationStatus>> {
    let operations = self
      .operations
      .read()
      .map_err(|e| Error::other(format!("operation lock poisoned: {e}")))?;
    Ok(operations.get(operation_id).map(|entry| entry.status.clone()))
  }

  async fn remove_before(&self, before: i64, limit: usize) -> Result<u64> {
    let mut operations = self
      .operations
      .write()
      .map_err(|e| Error::other(format!("operation lock poisoned: {e}")))?;
    let expired: Vec<String> = operations
      .iter()
      .filter(|(_, entry)| entry.updated_at < before)
      .map(|(id, _)| id.clone())
      .take(limit)
      .collect();
    for id in &expired {
      operations.remove(id);
    }
    Ok(expired.len() as u64)
  }
}
