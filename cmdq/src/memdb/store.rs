//! 内存 CommandStore trait 实现
//! Memory CommandStore trait implementation
//!
//! 使用内存数据结构实现 CommandStore trait
//! Implements CommandStore trait using in-memory data structures

use crate::base::{CommandStore, StoreTransaction};
use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::error::{Error, Result};
use crate::memdb::memory_store::{MemoryTransaction, StagedWrite};
use crate::memdb::MemoryCommandStore;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

#[async_trait]
impl StoreTransaction for MemoryTransaction {
  fn id(&self) -> &str {
    &self.id
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  /// 提交：在副本上依次应用暂存写入，全部成功后替换存储
  /// Commit: apply staged writes to a copy and swap it in only when all succeed
  async fn commit(self: Box<Self>) -> Result<()> {
    let writes = self.take_staged()?;
    if writes.is_empty() {
      return Ok(());
    }
    let mut storage = self.storage.write().await;
    let mut next = storage.clone();
    next
      .apply(&writes)
      .map_err(|e| Error::transaction(format!("commit {} aborted: {e}", self.id)))?;
    *storage = next;
    Ok(())
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    self.take_staged()?;
    Ok(())
  }
}

impl MemoryCommandStore {
  /// 将通用事务句柄还原为本存储的事务
  /// Turn a generic transaction handle back into one of this store's transactions
  fn own_transaction<'a>(&self, tx: &'a dyn StoreTransaction) -> Result<&'a MemoryTransaction> {
    let tx = tx
      .as_any()
      .downcast_ref::<MemoryTransaction>()
      .ok_or_else(|| Error::transaction(format!("transaction {} belongs to another store", tx.id())))?;
    if !Arc::ptr_eq(&tx.storage, &self.storage) {
      return Err(Error::transaction(format!(
        "transaction {} belongs to another store",
        tx.id
      )));
    }
    Ok(tx)
  }
}

#[async_trait]
impl CommandStore for MemoryCommandStore {
  async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
    Ok(Box::new(MemoryTransaction::new(self.storage.clone())))
  }

  async fn create_command(
    &self,
    command: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<String> {
    let id = Self::assign_id(command);
    match tx {
      Some(tx) => {
        let tx = self.own_transaction(tx)?;
        if self.storage.read().await.commands.contains_key(&id) {
          return Err(Error::CommandIdConflict { id });
        }
        tx.stage(StagedWrite::Create {
          id: id.clone(),
          command: command.clone(),
        })?;
      }
      None => {
        let mut storage = self.storage.write().await;
        storage.insert(&id, command)?;
      }
    }
    Ok(id)
  }

  async fn update_command(
    &self,
    id: &str,
    update: &CommandUpdate,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()> {
    match tx {
      Some(tx) => self.own_transaction(tx)?.stage(StagedWrite::Update {
        id: id.to_string(),
        update: update.clone(),
      }),
      None => {
        let mut storage = self.storage.write().await;
        storage.update(id, update)
      }
    }
  }

  async fn destroy_command(&self, name: &str) -> Result<u64> {
    let mut storage = self.storage.write().await;
    let before = storage.commands.len();
    storage.commands.retain(|_, s| s.command.name != name);
    Ok((before - storage.commands.len()) as u64)
  }

  async fn get_commands_with_status(
    &self,
    statuses: &[CommandStatus],
    excluded_names: &[String],
  ) -> Result<Vec<Command>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .ordered()
        .into_iter()
        .map(|s| &s.command)
        .filter(|c| statuses.contains(&c.status))
        .filter(|c| !excluded_names.contains(&c.name))
        .cloned()
        .collect(),
    )
  }

  async fn get_command_with_id(&self, id: &str) -> Result<Option<Command>> {
    let storage = self.storage.read().await;
    Ok(storage.commands.get(id).map(|s| s.command.clone()))
  }

  async fn remove_finalized_commands(&self, before: i64, limit: usize) -> Result<u64> {
    let mut storage = self.storage.write().await;
    let expired: Vec<String> = storage
      .ordered()
      .into_iter()
      .filter(|s| s.command.status.is_finalized())
      .filter(|s| {
        s.command
          .started_at
          .or(s.command.ready_at)
          .unwrap_or(s.created_at)
          < before
      })
      .take(limit)
      .map(|s| s.command.id.clone().unwrap_or_default())
      .collect();
    for id in &expired {
      storage.commands.remove(id);
    }
    Ok(expired.len() as u64)
  }
}
