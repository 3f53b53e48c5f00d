//! 内存存储实现
//! Memory store implementation
//!
//! 使用内存数据结构保存命令记录；事务先暂存写入，提交时整体生效
//! Keeps command records in in-memory data structures; transactions stage writes and apply them as a whole on commit

use crate::command::{Command, CommandUpdate};
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 存储中的命令记录
/// Command record as stored
#[derive(Clone, Debug)]
pub struct StoredCommand {
  /// 插入顺序
  /// Insertion order
  pub seq: u64,
  pub command: Command,
  pub created_at: i64,
  pub updated_at: i64,
}

/// 内存存储
/// Memory storage
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
  /// 命令记录 - key: command id
  /// Command records - key: command id
  pub commands: HashMap<String, StoredCommand>,
  /// 下一个插入序号
  /// Next insertion sequence number
  pub next_seq: u64,
}

impl MemoryStorage {
  /// 插入命令
  /// Insert a command
  pub(crate) fn insert(&mut self, id: &str, command: &Command) -> Result<()> {
    if self.commands.contains_key(id) {
      return Err(Error::CommandIdConflict { id: id.to_string() });
    }
    let now = Utc::now().timestamp_millis();
    let mut command = command.clone();
    command.id = Some(id.to_string());
    let seq = self.next_seq;
    self.next_seq += 1;
    self.commands.insert(
      id.to_string(),
      StoredCommand {
        seq,
        command,
        created_at: now,
        updated_at: now,
      },
    );
    Ok(())
  }

  /// 更新命令
  /// Update a command
  pub(crate) fn update(&mut self, id: &str, update: &CommandUpdate) -> Result<()> {
    let stored = self
      .commands
      .get_mut(id)
      .ok_or_else(|| Error::CommandNotFound { id: id.to_string() })?;
    stored.command.apply(update);
    stored.updated_at = Utc::now().timestamp_millis();
    Ok(())
  }

  /// 应用一组暂存写入
  /// Apply a batch of staged writes
  pub(crate) fn apply(&mut self, writes: &[StagedWrite]) -> Result<()> {
    for write in writes {
      match write {
        StagedWrite::Create { id, command } => self.insert(id, command)?,
        StagedWrite::Update { id, update } => self.update(id, update)?,
      }
    }
    Ok(())
  }

  /// 按插入顺序列出命令
  /// List commands in insertion order
  pub fn ordered(&self) -> Vec<&StoredCommand> {
    let mut stored: Vec<&StoredCommand> = self.commands.values().collect();
    stored.sort_by_key(|s| s.seq);
    stored
  }
}

/// 暂存的写入
/// Staged write
#[derive(Clone, Debug)]
pub(crate) enum StagedWrite {
  Create { id: String, command: Command },
  Update { id: String, update: CommandUpdate },
}

/// 内存事务
/// Memory transaction
pub struct MemoryTransaction {
  pub(crate) id: String,
  pub(crate) storage: Arc<RwLock<MemoryStorage>>,
  pub(crate) staged: Mutex<Vec<StagedWrite>>,
}

impl MemoryTransaction {
  pub(crate) fn new(storage: Arc<RwLock<MemoryStorage>>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      storage,
      staged: Mutex::new(Vec::new()),
    }
  }

  /// 暂存一次写入
  /// Stage a write
  pub(crate) fn stage(&self, write: StagedWrite) -> Result<()> {
    let mut staged = self
      .staged
      .lock()
      .map_err(|e| Error::transaction(format!("transaction {} poisoned: {e}", self.id)))?;
    staged.push(write);
    Ok(())
  }

  /// 取出全部暂存写入
  /// Take every staged write
  pub(crate) fn take_staged(&self) -> Result<Vec<StagedWrite>> {
    let mut staged = self
      .staged
      .lock()
      .map_err(|e| Error::transaction(format!("transaction {} poisoned: {e}", self.id)))?;
    Ok(std::mem::take(&mut *staged))
  }

  /// 暂存写入数量
  /// Number of staged writes
  pub fn staged_len(&self) -> usize {
    self.staged.lock().map(|s| s.len()).unwrap_or_default()
  }
}

/// 内存命令存储
/// Memory command store
#[derive(Clone)]
pub struct MemoryCommandStore {
  /// 内存存储
  /// Memory storage
  pub(crate) storage: Arc<RwLock<MemoryStorage>>,
}

impl Default for MemoryCommandStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryCommandStore {
  /// 创建新的内存存储实例
  /// Create a new memory store instance
  pub fn new() -> Self {
    Self {
      storage: Arc::new(RwLock::new(MemoryStorage::default())),
    }
  }

  /// 获取存储的引用
  /// Get storage reference
  pub fn storage(&self) -> &Arc<RwLock<MemoryStorage>> {
    &self.storage
  }

  /// 按插入顺序返回全部命令
  /// Every command, in insertion order
  pub async fn all_commands(&self) -> Vec<Command> {
    let storage = self.storage.read().await;
    storage
      .ordered()
      .into_iter()
      .map(|s| s.command.clone())
      .collect()
  }

  /// 命令数量
  /// Number of commands
  pub async fn len(&self) -> usize {
    self.storage.read().await.commands.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.storage.read().await.commands.is_empty()
  }

  /// 分配命令 ID
  /// Assign a command id
  pub(crate) fn assign_id(command: &Command) -> String {
    command
      .id
      .clone()
      .unwrap_or_else(|| Uuid::new_v4().to_string())
  }
}
