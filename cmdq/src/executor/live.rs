//! 存活命令集合
//! Live command set
//!
//! 记录已入队、等待定时器或正在执行的命令 ID；同一 ID 可能同时被多处持有，因此按引用计数
//! Tracks ids that are queued, waiting on a timer or running; one id can be held in several places at once, hence the reference count

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Default)]
pub struct LiveSet {
  ids: Arc<Mutex<HashMap<String, usize>>>,
}

impl LiveSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// 增加引用
  /// Take a reference
  pub fn acquire(&self, id: &str) {
    let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
    *ids.entry(id.to_string()).or_default() += 1;
  }

  /// 释放引用
  /// Drop a reference
  pub fn release(&self, id: &str) {
    let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(count) = ids.get_mut(id) {
      *count -= 1;
      if *count == 0 {
        ids.remove(id);
      }
    }
  }

  pub fn contains(&self, id: &str) -> bool {
    let ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
    ids.contains_key(id)
  }

  /// 存活命令数量
  /// Number of live commands
  pub fn len(&self) -> usize {
    self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
