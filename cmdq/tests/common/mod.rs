//! 集成测试公共工具
#![allow(dead_code)]

use async_trait::async_trait;
use cmdq::base::{CommandStore, StoreTransaction};
use cmdq::command::{Command, CommandStatus, CommandUpdate, Outcome, Sequence};
use cmdq::config::ExecutorConfig;
use cmdq::error::{Error, Result};
use cmdq::executor::CommandExecutor;
use cmdq::handler::{CommandContext, CommandHandler};
use cmdq::memdb::MemoryCommandStore;
use cmdq::resolver::CommandResolver;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 处理器行为
#[derive(Clone, Debug)]
pub enum Behavior {
  Succeed,
  Fail,
  Repeat,
  Retry,
  /// 弹出序列的下一步
  Continue,
  /// 在事务中插入子命令后失败
  InsertThenFail,
  Sleep(Duration),
  /// 构建一个未注册的子命令
  ContinueToUnknown,
}

/// 可编排的测试处理器，记录每次调用
#[derive(Clone)]
pub struct ScriptedHandler {
  defaults: Command,
  behavior: Behavior,
  pub executions: Arc<Mutex<Vec<(Instant, Command)>>>,
  pub recovers: Arc<AtomicUsize>,
  pub retry_finished: Arc<AtomicUsize>,
  pub expired: Arc<AtomicUsize>,
  pub active: Arc<AtomicUsize>,
  pub max_active: Arc<AtomicUsize>,
  expired_children: Vec<Command>,
}

impl ScriptedHandler {
  pub fn new(defaults: Command, behavior: Behavior) -> Self {
    Self {
      defaults,
      behavior,
      executions: Arc::new(Mutex::new(Vec::new())),
      recovers: Arc::new(AtomicUsize::new(0)),
      retry_finished: Arc::new(AtomicUsize::new(0)),
      expired: Arc::new(AtomicUsize::new(0)),
      active: Arc::new(AtomicUsize::new(0)),
      max_active: Arc::new(AtomicUsize::new(0)),
      expired_children: Vec::new(),
    }
  }

  pub fn with_expired_children(mut self, children: Vec<Command>) -> Self {
    self.expired_children = children;
    self
  }

  pub fn defaults_command(&self) -> Command {
    self.defaults.clone()
  }

  pub fn execution_count(&self) -> usize {
    self.executions.lock().unwrap().len()
  }

  pub fn execution_times(&self) -> Vec<Instant> {
    self.executions.lock().unwrap().iter().map(|(t, _)| *t).collect()
  }

  pub fn executed_commands(&self) -> Vec<Command> {
    self
      .executions
      .lock()
      .unwrap()
      .iter()
      .map(|(_, c)| c.clone())
      .collect()
  }
}

#[async_trait]
impl CommandHandler for ScriptedHandler {
  fn defaults(&self) -> Command {
    self.defaults.clone()
  }

  async fn execute(&self, command: &mut Command, ctx: &CommandContext<'_>) -> Result<Outcome> {
    self
      .executions
      .lock()
      .unwrap()
      .push((Instant::now(), command.clone()));
    match &self.behavior {
      Behavior::Succeed => Ok(Outcome::Empty),
      Behavior::Fail => Err(Error::execution(format!("{} failed", command.name))),
      Behavior::Repeat => Ok(Outcome::Repeat),
      Behavior::Retry => Ok(Outcome::Retry),
      Behavior::Continue => {
        let sequence = command.sequence.clone();
        ctx.continue_sequence(command.data.clone(), Some(&sequence), None)
      }
      Behavior::InsertThenFail => {
        ctx
          .store()
          .create_command(&Command::new("orphan"), ctx.transaction())
          .await?;
        Err(Error::execution("failed after insert"))
      }
      Behavior::ContinueToUnknown => {
        let sequence = Sequence::from(["notRegistered"]);
        ctx.continue_sequence(command.data.clone(), Some(&sequence), None)
      }
      Behavior::Sleep(duration) => {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(*duration).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Outcome::Empty)
      }
    }
  }

  async fn recover(
    &self,
    _command: &Command,
    _err: &Error,
    _ctx: &CommandContext<'_>,
  ) -> Result<Outcome> {
    self.recovers.fetch_add(1, Ordering::SeqCst);
    Ok(Outcome::Empty)
  }

  async fn expired(&self, _command: &Command, _ctx: &CommandContext<'_>) -> Result<Outcome> {
    self.expired.fetch_add(1, Ordering::SeqCst);
    Ok(Outcome::Commands(self.expired_children.clone()))
  }

  async fn retry_finished(&self, _command: &Command) {
    self.retry_finished.fetch_add(1, Ordering::SeqCst);
  }
}

/// 记录所有更新的存储包装
pub struct RecordingStore {
  inner: MemoryCommandStore,
  updates: Mutex<Vec<(String, CommandUpdate)>>,
  /// 置位后，写 startedAt 会失败
  pub fail_started_at: AtomicBool,
  /// 接下来需要失败的提交次数
  pub failing_commits: AtomicUsize,
}

/// 提交可能被拒绝的事务包装
struct FlakyTransaction {
  inner: Box<dyn StoreTransaction>,
  fail_commit: bool,
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
  fn id(&self) -> &str {
    self.inner.id()
  }

  fn as_any(&self) -> &dyn Any {
    self.inner.as_any()
  }

  async fn commit(self: Box<Self>) -> Result<()> {
    if self.fail_commit {
      self.inner.rollback().await?;
      return Err(Error::transaction("serialization failure on commit"));
    }
    self.inner.commit().await
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    self.inner.rollback().await
  }
}

impl RecordingStore {
  pub fn new() -> Self {
    Self {
      inner: MemoryCommandStore::new(),
      updates: Mutex::new(Vec::new()),
      fail_started_at: AtomicBool::new(false),
      failing_commits: AtomicUsize::new(0),
    }
  }

  pub fn memory(&self) -> &MemoryCommandStore {
    &self.inner
  }

  /// 某个命令的状态更新序列
  pub fn status_history(&self, id: &str) -> Vec<(CommandStatus, Option<u32>)> {
    self
      .updates
      .lock()
      .unwrap()
      .iter()
      .filter(|(update_id, _)| update_id == id)
      .filter_map(|(_, u)| u.status.map(|s| (s, u.retries)))
      .collect()
  }

  /// startedAt 写入次数
  pub fn started_at_stamps(&self, id: &str) -> usize {
    self
      .updates
      .lock()
      .unwrap()
      .iter()
      .filter(|(update_id, u)| update_id == id && u.started_at.is_some())
      .count()
  }
}

#[async_trait]
impl CommandStore for RecordingStore {
  async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
    let fail_commit = self
      .failing_commits
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    Ok(Box::new(FlakyTransaction {
      inner: self.inner.begin().await?,
      fail_commit,
    }))
  }

  async fn create_command(
    &self,
    command: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<String> {
    self.inner.create_command(command, tx).await
  }

  async fn update_command(
    &self,
    id: &str,
    update: &CommandUpdate,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()> {
    if update.started_at.is_some() && self.fail_started_at.load(Ordering::SeqCst) {
      return Err(Error::store("connection reset"));
    }
    self
      .updates
      .lock()
      .unwrap()
      .push((id.to_string(), update.clone()));
    self.inner.update_command(id, update, tx).await
  }

  async fn destroy_command(&self, name: &str) -> Result<u64> {
    self.inner.destroy_command(name).await
  }

  async fn get_commands_with_status(
    &self,
    statuses: &[CommandStatus],
    excluded_names: &[String],
  ) -> Result<Vec<Command>> {
    self.inner.get_commands_with_status(statuses, excluded_names).await
  }

  async fn get_command_with_id(&self, id: &str) -> Result<Option<Command>> {
    self.inner.get_command_with_id(id).await
  }

  async fn remove_finalized_commands(&self, before: i64, limit: usize) -> Result<u64> {
    self.inner.remove_finalized_commands(before, limit).await
  }
}

/// 测试配置：故障不退出进程，定时器较短
pub fn test_config() -> ExecutorConfig {
  ExecutorConfig::new()
    .parallelism(4)
    .exit_on_fault(false)
    .default_repeat_interval(Duration::from_millis(100))
    .default_command_delay(Duration::from_millis(20))
    .shutdown_timeout(Duration::from_secs(2))
    .verbose_logging(true)
}

pub fn resolver_with(handlers: Vec<ScriptedHandler>) -> Arc<CommandResolver> {
  let mut resolver = CommandResolver::new();
  for handler in handlers {
    resolver.register(Arc::new(handler));
  }
  Arc::new(resolver)
}

pub fn executor(
  config: ExecutorConfig,
  store: Arc<dyn CommandStore>,
  resolver: Arc<CommandResolver>,
) -> CommandExecutor {
  CommandExecutor::new(config, store, resolver).unwrap()
}

/// 轮询直到条件满足或超时
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  condition()
}

/// 等待持久化状态
pub async fn wait_for_status(
  store: &dyn CommandStore,
  id: &str,
  status: CommandStatus,
  timeout: Duration,
) -> Command {
  let deadline = Instant::now() + timeout;
  loop {
    let command = store.get_command_with_id(id).await.unwrap().unwrap();
    if command.status == status || Instant::now() >= deadline {
      assert_eq!(command.status, status, "command {} ({})", command.name, id);
      return command;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
