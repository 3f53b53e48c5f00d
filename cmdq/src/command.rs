//! 命令模块
//! Command module
//!
//! 定义了命令记录、状态、序列与执行结果等数据结构
//! Defines the command record, its status, the workflow sequence and execution outcomes

use crate::error::Error;
use crate::executor::delay::duration_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 命令状态
/// Command status
///
/// 状态机：PENDING → STARTED → {COMPLETED, PENDING(重试), REPEATING, FAILED}
/// State machine: PENDING → STARTED → {COMPLETED, PENDING(retry), REPEATING, FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
  /// 等待执行
  /// Waiting to be dispatched
  Pending,
  /// 正在执行
  /// Currently executing
  Started,
  /// 周期性命令，等待下一次执行
  /// Periodic command waiting for its next run
  Repeating,
  /// 已完成
  /// Completed
  Completed,
  /// 重试耗尽后失败
  /// Failed after the retry budget ran out
  Failed,
  /// 截止时间已过
  /// Deadline passed before dispatch
  Expired,
  /// 名称无法解析为处理器
  /// Name did not resolve to a handler
  Unknown,
}

impl CommandStatus {
  /// 所有终止状态
  /// All terminal statuses
  pub const FINALIZED: [CommandStatus; 4] = [
    CommandStatus::Completed,
    CommandStatus::Failed,
    CommandStatus::Expired,
    CommandStatus::Unknown,
  ];

  /// 重启时需要重放的状态
  /// Statuses replayed on restart
  pub const UNFINISHED: [CommandStatus; 3] = [
    CommandStatus::Pending,
    CommandStatus::Started,
    CommandStatus::Repeating,
  ];

  /// 转换为字符串
  /// Convert to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
      Self::Started => "STARTED",
      Self::Repeating => "REPEATING",
      Self::Completed => "COMPLETED",
      Self::Failed => "FAILED",
      Self::Expired => "EXPIRED",
      Self::Unknown => "UNKNOWN",
    }
  }

  /// 是否为终止状态
  /// Whether the status is terminal
  pub fn is_finalized(&self) -> bool {
    Self::FINALIZED.contains(self)
  }
}

impl fmt::Display for CommandStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CommandStatus {
  type Err = Error;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "PENDING" => Ok(Self::Pending),
      "STARTED" => Ok(Self::Started),
      "REPEATING" => Ok(Self::Repeating),
      "COMPLETED" => Ok(Self::Completed),
      "FAILED" => Ok(Self::Failed),
      "EXPIRED" => Ok(Self::Expired),
      "UNKNOWN" => Ok(Self::Unknown),
      other => Err(Error::store(format!("invalid command status: {other}"))),
    }
  }
}

/// 工作流中剩余的命令名称
/// Remaining command names of a workflow
///
/// 不可变队列：弹出操作返回新的尾部，原序列保持不变
/// Immutable queue: popping returns a new tail and leaves the original untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(im::Vector<String>);

impl Sequence {
  /// 创建空序列
  /// Create an empty sequence
  pub fn new() -> Self {
    Self(im::Vector::new())
  }

  /// 弹出下一个命令名称
  /// Pop the next command name
  pub fn pop_front(&self) -> Option<(String, Sequence)> {
    let mut tail = self.0.clone();
    let head = tail.pop_front()?;
    Some((head, Sequence(tail)))
  }

  /// 查看下一个命令名称
  /// Peek at the next command name
  pub fn front(&self) -> Option<&str> {
    self.0.front().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &String> {
    self.0.iter()
  }
}

impl<S: Into<String>> FromIterator<S> for Sequence {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Sequence {
  fn from(names: [S; N]) -> Self {
    names.into_iter().collect()
  }
}

impl From<Vec<String>> for Sequence {
  fn from(names: Vec<String>) -> Self {
    names.into_iter().collect()
  }
}

/// 命令记录 - 持久化和调度的基本单元
/// Command record - the unit that is persisted and scheduled
///
/// 字段与持久化记录形状一一对应
/// Fields map one-to-one onto the persisted record shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
  /// 持久化后分配的 ID
  /// Id assigned once persisted
  pub id: Option<String>,
  /// 处理器名称
  /// Handler name
  pub name: String,
  /// 持久化形式的数据
  /// Payload in its persisted form
  pub data: Value,
  /// 生命周期状态
  /// Lifecycle state
  pub status: CommandStatus,
  /// 最早执行时间（毫秒时间戳）
  /// Earliest "not before" timestamp, epoch milliseconds
  pub ready_at: Option<i64>,
  /// 在 ready_at 之后的额外等待（毫秒）
  /// Additional wait beyond ready_at, milliseconds
  pub delay: u64,
  /// 最近一次派发时间
  /// Last dispatch timestamp
  pub started_at: Option<i64>,
  /// 硬性截止时间
  /// Optional hard cutoff
  pub deadline_at: Option<i64>,
  /// 重复/退避间隔（毫秒）
  /// Repeat and backoff interval, milliseconds
  pub period: Option<u64>,
  /// 剩余重试次数
  /// Remaining retry budget
  pub retries: u32,
  /// 最近一次错误信息
  /// Last error text
  pub message: Option<String>,
  /// 父命令 ID
  /// Id of the command that spawned this one
  pub parent_id: Option<String>,
  /// 是否在事务中执行
  /// Whether execute() runs atomically with its bookkeeping
  pub transactional: bool,
  /// 剩余工作流步骤
  /// Remaining workflow steps
  pub sequence: Sequence,
}

impl Command {
  /// 创建新命令
  /// Create a new command
  pub fn new<T: AsRef<str>>(name: T) -> Self {
    Self {
      id: None,
      name: name.as_ref().to_string(),
      data: Value::Null,
      status: CommandStatus::Pending,
      ready_at: None,
      delay: 0,
      started_at: None,
      deadline_at: None,
      period: None,
      retries: 0,
      message: None,
      parent_id: None,
      transactional: false,
      sequence: Sequence::new(),
    }
  }

  /// 由序列创建命令，名称取自序列头部
  /// Create a command whose name is taken from the head of the sequence
  pub fn from_sequence(sequence: Sequence) -> Self {
    let mut command = Self::new("");
    command.sequence = sequence;
    command
  }

  pub fn with_data(mut self, data: Value) -> Self {
    self.data = data;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = duration_millis(delay);
    self
  }

  pub fn with_period(mut self, period: Duration) -> Self {
    self.period = Some(duration_millis(period));
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn with_deadline_at(mut self, deadline_at: i64) -> Self {
    self.deadline_at = Some(deadline_at);
    self
  }

  pub fn with_ready_at(mut self, ready_at: i64) -> Self {
    self.ready_at = Some(ready_at);
    self
  }

  pub fn with_transactional(mut self, transactional: bool) -> Self {
    self.transactional = transactional;
    self
  }

  pub fn with_sequence<S: Into<Sequence>>(mut self, sequence: S) -> Self {
    self.sequence = sequence.into();
    self
  }

  /// 获取 ID 字符串，未持久化时返回 "-"
  /// Id for logging, "-" when not persisted
  pub fn id_or_dash(&self) -> &str {
    self.id.as_deref().unwrap_or("-")
  }

  /// 已持久化的 ID
  /// Persisted id
  pub fn persisted_id(&self) -> crate::error::Result<&str> {
    self.id.as_deref().ok_or_else(|| Error::NotPersisted {
      name: self.name.clone(),
    })
  }

  /// 应用部分更新
  /// Apply a partial update
  pub fn apply(&mut self, update: &CommandUpdate) {
    if let Some(status) = update.status {
      self.status = status;
    }
    if let Some(started_at) = update.started_at {
      self.started_at = Some(started_at);
    }
    if let Some(data) = &update.data {
      self.data = data.clone();
    }
    if let Some(retries) = update.retries {
      self.retries = retries;
    }
    if let Some(message) = &update.message {
      self.message = Some(message.clone());
    }
    if let Some(ready_at) = update.ready_at {
      self.ready_at = Some(ready_at);
    }
  }

  /// 应用命令选项
  /// Apply command options
  pub fn apply_options(&mut self, opts: &CommandOptions) {
    if let Some(delay) = opts.delay {
      self.delay = duration_millis(delay);
    }
    if let Some(period) = opts.period {
      self.period = Some(duration_millis(period));
    }
    if let Some(retries) = opts.retries {
      self.retries = retries;
    }
    if let Some(deadline_at) = opts.deadline_at {
      self.deadline_at = Some(deadline_at);
    }
    if let Some(ready_at) = opts.ready_at {
      self.ready_at = Some(ready_at);
    }
    if let Some(transactional) = opts.transactional {
      self.transactional = transactional;
    }
  }
}

/// 命令的部分更新
/// Partial update of a command record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandUpdate {
  pub status: Option<CommandStatus>,
  pub started_at: Option<i64>,
  pub data: Option<Value>,
  pub retries: Option<u32>,
  pub message: Option<String>,
  pub ready_at: Option<i64>,
}

impl CommandUpdate {
  pub fn status(status: CommandStatus) -> Self {
    Self {
      status: Some(status),
      ..Default::default()
    }
  }

  pub fn started_at(started_at: i64) -> Self {
    Self {
      started_at: Some(started_at),
      ..Default::default()
    }
  }

  pub fn with_data(mut self, data: Value) -> Self {
    self.data = Some(data);
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
    self.message = Some(message.into());
    self
  }
}

/// 构建命令时覆盖默认值的选项
/// Options overriding defaults when building a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOptions {
  pub delay: Option<Duration>,
  pub period: Option<Duration>,
  pub retries: Option<u32>,
  pub deadline_at: Option<i64>,
  pub ready_at: Option<i64>,
  pub transactional: Option<bool>,
}

/// 执行结果
/// Outcome of executing a command
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Outcome {
  /// 没有后续工作
  /// No further work
  #[default]
  Empty,
  /// 在 period 之后重新调度同一命令
  /// Reschedule the same command after its period
  Repeat,
  /// 消耗一次重试预算并重新调度
  /// Consume one unit of retry budget and reschedule
  Retry,
  /// 需要持久化并入队的子命令
  /// Child commands to persist and enqueue
  Commands(Vec<Command>),
}

impl Outcome {
  /// 子命令列表
  /// Child commands, empty for every other outcome
  pub fn into_commands(self) -> Vec<Command> {
    match self {
      Outcome::Commands(commands) => commands,
      _ => Vec::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Outcome::Empty => true,
      Outcome::Commands(commands) => commands.is_empty(),
      _ => false,
    }
  }
}

/// 合并命令数据：对象按键覆盖，其余情况整体替换（null 除外）
/// Merge command data: objects merge key by key, anything else replaces unless null
pub fn merge_data(base: Value, overlay: Value) -> Value {
  match (base, overlay) {
    (Value::Object(mut base), Value::Object(overlay)) => {
      for (key, value) in overlay {
        base.insert(key, value);
      }
      Value::Object(base)
    }
    (base, Value::Null) => base,
    (_, overlay) => overlay,
  }
}
