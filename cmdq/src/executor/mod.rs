//! 命令执行器
//! Command executor
//!
//! 有界工作池从队列中取出命令并执行；延迟、重复与重试退避都由池外的定时器承担
//! A bounded worker pool drains the queue; delays, repeats and retry backoff wait on timers outside the pool
//!
//! ## Examples / 示例
//!
//! ```rust,no_run
//! use cmdq::config::ExecutorConfig;
//! use cmdq::executor::CommandExecutor;
//! use cmdq::memdb::MemoryCommandStore;
//! use cmdq::resolver::CommandResolver;
//! use std::sync::Arc;
//!
//! # async fn example() -> cmdq::error::Result<()> {
//! let executor = CommandExecutor::new(
//!   ExecutorConfig::default(),
//!   Arc::new(MemoryCommandStore::new()),
//!   Arc::new(CommandResolver::new()),
//! )?;
//! executor.add_default_commands().await?;
//! executor.replay_old_commands().await?;
//! executor.start()?;
//! executor.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod delay;
pub mod live;
mod persistence;
mod worker;

use crate::base::{CommandStore, StoreTransaction};
use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::handler::CommandContext;
use crate::operation::OperationTracker;
use crate::resolver::CommandResolver;
use delay::{duration_millis, fold_delay, now_millis};
use live::LiveSet;

/// 执行器共享状态
/// Shared executor state
pub(crate) struct ExecutorInner {
  pub(crate) config: ExecutorConfig,
  pub(crate) store: Arc<dyn CommandStore>,
  pub(crate) resolver: Arc<CommandResolver>,
  pub(crate) operations: OnceLock<Arc<dyn OperationTracker>>,

  // 工作队列
  // Worker queue
  queue_tx: mpsc::UnboundedSender<Command>,
  queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,

  // 信号量用于限制并发工作者数量
  // Semaphore to limit number of concurrent workers
  sema: Arc<Semaphore>,

  paused: watch::Sender<bool>,
  shutdown: CancellationToken,
  pub(crate) live: LiveSet,
  fault: OnceLock<String>,
  dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// 命令执行器
/// Command executor
#[derive(Clone)]
pub struct CommandExecutor {
  inner: Arc<ExecutorInner>,
}

impl CommandExecutor {
  /// 创建新的执行器
  /// Create a new executor
  ///
  /// 执行器在调用 [`CommandExecutor::start`] 之前只接收命令，不会执行
  /// Until [`CommandExecutor::start`] is called the executor only accepts commands, it does not run them
  pub fn new(
    config: ExecutorConfig,
    store: Arc<dyn CommandStore>,
    resolver: Arc<CommandResolver>,
  ) -> Result<Self> {
    config.validate()?;
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (paused, _) = watch::channel(false);
    Ok(Self {
      inner: Arc::new(ExecutorInner {
        sema: Arc::new(Semaphore::new(config.parallelism)),
        config,
        store,
        resolver,
        operations: OnceLock::new(),
        queue_tx,
        queue_rx: Mutex::new(Some(queue_rx)),
        paused,
        shutdown: CancellationToken::new(),
        live: LiveSet::new(),
        fault: OnceLock::new(),
        dispatcher: Mutex::new(None),
      }),
    })
  }

  /// 设置操作跟踪器，默认 recover() 会用它记录失败
  /// Set the operation tracker the default recover() reports failures to
  pub fn set_operation_tracker(&self, tracker: Arc<dyn OperationTracker>) -> Result<()> {
    self
      .inner
      .operations
      .set(tracker)
      .map_err(|_| Error::config("operation tracker already set"))
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.inner.config
  }

  pub fn store(&self) -> Arc<dyn CommandStore> {
    self.inner.store.clone()
  }

  pub fn resolver(&self) -> Arc<CommandResolver> {
    self.inner.resolver.clone()
  }

  /// 调度命令
  /// Schedule a command
  ///
  /// `insert` 为 true 时先持久化为新记录；否则重新调度已有记录
  /// With `insert` the command is persisted as a new record first; otherwise an existing record is rescheduled
  pub async fn add(&self, command: Command, delay: Duration, insert: bool) -> Result<Command> {
    self
      .inner
      .add(command, duration_millis(delay), insert)
      .await
  }

  /// 暂停向工作池派发
  /// Stop intake into the worker pool
  pub fn pause_queue(&self) {
    self.inner.paused.send_replace(true);
    info!("Command queue paused");
  }

  /// 恢复向工作池派发
  /// Resume intake into the worker pool
  pub fn resume_queue(&self) {
    self.inner.paused.send_replace(false);
    info!("Command queue resumed");
  }

  pub fn is_paused(&self) -> bool {
    *self.inner.paused.borrow()
  }

  /// 按名称删除持久化命令
  /// Delete persisted commands by name
  pub async fn delete(&self, name: &str) -> Result<u64> {
    let removed = self.inner.store.destroy_command(name).await?;
    debug!(command = %name, removed, "Commands deleted");
    Ok(removed)
  }

  /// 重置并注册永久命令
  /// Reset and register the permanent commands
  ///
  /// 每个永久命令先删除再插入，保证每次进程启动后恰好存在一份
  /// Each permanent command is deleted then inserted, so exactly one exists per process start
  pub async fn add_default_commands(&self) -> Result<()> {
    let inner = &self.inner;
    for name in &inner.config.permanent_commands {
      inner.store.destroy_command(name).await?;
      let Some(handler) = inner.resolver.resolve(name) else {
        warn!(command = %name, "Permanent command has no registered handler");
        continue;
      };
      let command = handler.defaults();
      inner
        .add(
          command,
          duration_millis(inner.config.default_command_delay),
          true,
        )
        .await?;
      info!(command = %name, "Permanent command registered");
    }
    Ok(())
  }

  /// 重放未完成的命令
  /// Replay unfinished commands
  ///
  /// 父命令未完成的子命令保持休眠，等待父命令重新执行时重新生成
  /// Children of an unfinished parent stay dormant until the parent re-executes and re-emits them
  pub async fn replay_old_commands(&self) -> Result<usize> {
    let inner = &self.inner;
    let pending = inner
      .store
      .get_commands_with_status(&CommandStatus::UNFINISHED, &inner.config.permanent_commands)
      .await?;

    let mut replayed = 0;
    for command in pending {
      let id = command.persisted_id()?.to_string();
      if inner.live.contains(&id) {
        debug!(command = %command.name, command_id = %id, "Command already live, skipping replay");
        continue;
      }
      if !inner.parent_completed(&command).await? {
        debug!(command = %command.name, command_id = %id, "Parent not completed, leaving command dormant");
        continue;
      }
      inner.add(command, 0, false).await?;
      replayed += 1;
    }

    info!("Replayed {} commands", replayed);
    Ok(replayed)
  }

  /// 启动派发循环
  /// Start the dispatch loop
  pub fn start(&self) -> Result<()> {
    let rx = self
      .inner
      .queue_rx
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let Some(rx) = rx else {
      warn!("Command executor already started");
      return Ok(());
    };
    if self.inner.shutdown.is_cancelled() {
      return Err(Error::ExecutorClosed);
    }

    let handle = tokio::spawn(ExecutorInner::dispatch(self.inner.clone(), rx));
    *self
      .inner
      .dispatcher
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    info!(
      parallelism = self.inner.config.parallelism,
      "Command executor started"
    );
    Ok(())
  }

  /// 关闭执行器并等待正在执行的命令完成
  /// Shut down the executor and wait for in-flight commands
  pub async fn shutdown(&self) {
    self.inner.shutdown.cancel();

    let handle = self
      .inner
      .dispatcher
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = handle {
      let _ = handle.await;
    }

    info!("Waiting for all workers to finish...");
    let permits = self.inner.config.parallelism as u32;
    match tokio::time::timeout(
      self.inner.config.shutdown_timeout,
      self.inner.sema.acquire_many(permits),
    )
    .await
    {
      Ok(_) => info!("All workers have finished"),
      Err(_) => warn!(
        "Shutdown timed out after {:?} with workers still running",
        self.inner.config.shutdown_timeout
      ),
    }
  }

  pub fn is_shutdown(&self) -> bool {
    self.inner.shutdown.is_cancelled()
  }

  /// 调度器故障信息
  /// Scheduler fault, if one stopped the executor
  pub fn fault(&self) -> Option<String> {
    self.inner.fault.get().cloned()
  }

  /// 存活命令数量（队列中、定时器中或执行中）
  /// Number of live commands: queued, timed or running
  pub fn live_count(&self) -> usize {
    self.inner.live.len()
  }

  /// 正在执行的命令数量
  /// Number of commands currently executing
  pub fn active_workers(&self) -> usize {
    self.inner.config.parallelism - self.inner.sema.available_permits()
  }
}

impl ExecutorInner {
  pub(crate) fn context<'a>(&'a self, tx: Option<&'a dyn StoreTransaction>) -> CommandContext<'a> {
    CommandContext::new(&self.resolver, self.store.as_ref())
      .with_transaction(tx)
      .with_operations(self.operations.get().map(|o| o.as_ref()))
  }

  /// 调度入口
  /// Scheduling entry point
  pub(crate) async fn add(
    self: &Arc<Self>,
    mut command: Command,
    delay: u64,
    insert: bool,
  ) -> Result<Command> {
    if self.shutdown.is_cancelled() {
      return Err(Error::ExecutorClosed);
    }

    let max = duration_millis(self.config.max_timer_delay);
    let fold = fold_delay(delay, command.delay, max, now_millis());
    if let Some(ready_at) = fold.ready_at {
      command.ready_at = Some(ready_at);
    }

    if insert {
      command = self.insert(command, None).await?;
    } else if let Some(ready_at) = fold.ready_at {
      let update = CommandUpdate {
        ready_at: Some(ready_at),
        ..Default::default()
      };
      self.update(&mut command, update, None).await?;
    }

    let id = command.persisted_id()?.to_string();
    self.live.acquire(&id);

    if fold.timer == 0 {
      self.enqueue(command.clone())?;
      return Ok(command);
    }

    if self.config.verbose_logging {
      debug!(command = %command.name, command_id = %id, delay_ms = fold.timer, "Command scheduled");
    }
    let inner = self.clone();
    let timer = Duration::from_millis(fold.timer);
    let scheduled = command.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = tokio::time::sleep(timer) => {
          if let Err(e) = inner.enqueue(scheduled) {
            debug!("Timer fired after close: {}", e);
          }
        }
        _ = inner.shutdown.cancelled() => {
          inner.live.release(&id);
        }
      }
    });
    Ok(command)
  }

  /// 放入工作队列；调用方已持有存活引用
  /// Push onto the worker queue; the caller already holds a live reference
  fn enqueue(&self, command: Command) -> Result<()> {
    let id = command.id.clone().unwrap_or_default();
    if self.shutdown.is_cancelled() {
      self.live.release(&id);
      return Err(Error::ExecutorClosed);
    }
    self.queue_tx.send(command).map_err(|_| {
      self.live.release(&id);
      Error::ExecutorClosed
    })
  }

  /// 父命令已完成或不存在
  /// Parent is completed or gone
  async fn parent_completed(&self, command: &Command) -> Result<bool> {
    let Some(parent_id) = &command.parent_id else {
      return Ok(true);
    };
    Ok(match self.store.get_command_with_id(parent_id).await? {
      None => true,
      Some(parent) => parent.status == CommandStatus::Completed,
    })
  }

  /// 派发循环
  /// Dispatch loop
  async fn dispatch(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut paused = self.paused.subscribe();
    loop {
      let command = tokio::select! {
        command = rx.recv() => match command {
          Some(command) => command,
          None => break,
        },
        _ = self.shutdown.cancelled() => break,
      };

      // 暂停期间保留已取出的命令
      // Hold the dequeued command while paused
      let resumed = tokio::select! {
        result = paused.wait_for(|p| !*p) => result.is_ok(),
        _ = self.shutdown.cancelled() => false,
      };
      if !resumed {
        break;
      }

      // 尝试获取信号量令牌
      // Acquire a semaphore permit
      let permit = tokio::select! {
        permit = self.sema.clone().acquire_owned() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
        _ = self.shutdown.cancelled() => break,
      };

      let inner = self.clone();
      tokio::spawn(async move {
        let _permit = permit;
        let id = command.id.clone().unwrap_or_default();
        if let Err(e) = inner.process(command).await {
          inner.on_fault(e);
        }
        inner.live.release(&id);
      });
    }

    debug!("Command dispatcher exited");
  }

  /// 调度器故障：记录后退出进程，或停止派发
  /// Scheduler fault: log, then exit the process or stop dispatching
  fn on_fault(&self, err: Error) {
    let err = err.into_fault("command executor");
    error!("{}", err);
    let _ = self.fault.set(err.to_string());
    if self.config.exit_on_fault {
      std::process::exit(1);
    }
    self.shutdown.cancel();
  }
}
