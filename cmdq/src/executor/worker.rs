//! 单个命令的执行流程
//! Execution of a single dequeued command
//!
//! 只有调度器自身的簿记失败会以 `Err` 返回；处理器的错误都在这里转换为持久化状态
//! Only failures of the scheduler's own bookkeeping come back as `Err`; handler errors are turned into persisted status here

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::delay::{duration_millis, now_millis, remaining};
use super::ExecutorInner;
use crate::base::StoreTransaction;
use crate::command::{Command, CommandStatus, CommandUpdate, Outcome};
use crate::error::{Error, Result};
use crate::handler::CommandHandler;

/// 一次执行在提交之后需要做的事
/// What an attempt leaves to do once committed
enum Followup {
  /// 已持久化的子命令
  /// Children, already persisted
  Completed(Vec<Command>),
  Repeat(Command),
  Retry(Command),
}

impl ExecutorInner {
  pub(crate) async fn process(self: &Arc<Self>, mut command: Command) -> Result<()> {
    let now = now_millis();

    match self
      .update(&mut command, CommandUpdate::started_at(now), None)
      .await
    {
      Ok(()) => {}
      Err(Error::CommandNotFound { id }) => {
        debug!(command = %command.name, command_id = %id, "Command was deleted, dropping it");
        return Ok(());
      }
      Err(e) => return Err(e.into_fault("stamp startedAt")),
    }

    let Some(handler) = self.resolver.resolve(&command.name) else {
      warn!(command = %command.name, command_id = %command.id_or_dash(), "Unknown command");
      self
        .set_status(&mut command, CommandStatus::Unknown, None)
        .await
        .map_err(|e| e.into_fault("persist UNKNOWN status"))?;
      return Ok(());
    };

    if command.deadline_at.is_some_and(|deadline| now > deadline) {
      warn!(command = %command.name, command_id = %command.id_or_dash(), "Command is too late");
      self
        .set_status(&mut command, CommandStatus::Expired, None)
        .await
        .map_err(|e| e.into_fault("persist EXPIRED status"))?;
      self.run_expired(&handler, &command).await;
      return Ok(());
    }

    if let Some(left) = remaining(command.ready_at, command.delay, now) {
      let max = duration_millis(self.config.max_timer_delay);
      return match self.add(command, left.min(max), false).await {
        Ok(_) | Err(Error::ExecutorClosed) => Ok(()),
        Err(e) => Err(e.into_fault("reschedule early command")),
      };
    }

    if self.config.verbose_logging {
      debug!(command = %command.name, command_id = %command.id_or_dash(), "Command started");
    }
    let result = match self.run_unit(&handler, &command).await {
      Ok(followup) => self.follow_up(followup).await,
      Err(e) => Err(e),
    };
    match result {
      Ok(()) | Err(Error::ExecutorClosed) => {}
      Err(e) => self.handle_error(&handler, command, e).await,
    }
    Ok(())
  }

  /// 执行一次，事务性命令包裹在存储事务中
  /// Run one attempt, wrapped in a store transaction for transactional commands
  async fn run_unit(
    self: &Arc<Self>,
    handler: &Arc<dyn CommandHandler>,
    command: &Command,
  ) -> Result<Followup> {
    if !command.transactional {
      return self.attempt(handler, command, None).await;
    }

    let tx = self.store.begin().await?;
    match self.attempt(handler, command, Some(tx.as_ref())).await {
      Ok(followup) => {
        tx.commit().await?;
        Ok(followup)
      }
      Err(e) => {
        let tx_id = tx.id().to_string();
        if let Err(rollback_err) = tx.rollback().await {
          warn!(transaction = %tx_id, "Rollback failed: {}", rollback_err);
        }
        Err(e)
      }
    }
  }

  async fn attempt(
    self: &Arc<Self>,
    handler: &Arc<dyn CommandHandler>,
    command: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<Followup> {
    let mut record = command.clone();
    let id = record.persisted_id()?.to_string();
    self
      .set_status(&mut record, CommandStatus::Started, tx)
      .await?;

    let mut working = record.clone();
    working.data = handler.unpack(working.data)?;
    let ctx = self.context(tx);
    let outcome = handler.execute(&mut working, &ctx).await?;

    let children = match outcome {
      Outcome::Repeat => {
        let data = handler.pack(working.data)?;
        let update = CommandUpdate::status(CommandStatus::Repeating).with_data(data);
        self.update(&mut record, update, tx).await?;
        return Ok(Followup::Repeat(record));
      }
      Outcome::Retry => {
        if self.retry(handler, &mut record, &working, tx).await? {
          return Ok(Followup::Retry(record));
        }
        Vec::new()
      }
      Outcome::Empty => Vec::new(),
      Outcome::Commands(children) => children,
    };

    let mut inserted = Vec::with_capacity(children.len());
    for mut child in children {
      child.parent_id = Some(id.clone());
      inserted.push(self.insert(child, tx).await?);
    }
    self
      .set_status(&mut record, CommandStatus::Completed, tx)
      .await?;
    Ok(Followup::Completed(inserted))
  }

  /// 处理器请求重试：还有预算时返回 true
  /// Handler asked for a retry: true while budget remains
  async fn retry(
    &self,
    handler: &Arc<dyn CommandHandler>,
    record: &mut Command,
    working: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<bool> {
    if working.retries <= 1 {
      handler.retry_finished(working).await;
      return Ok(false);
    }
    let data = handler.pack(working.data.clone())?;
    let mut update = CommandUpdate::status(CommandStatus::Pending)
      .with_data(data)
      .with_retries(working.retries - 1);
    if let Some(message) = &working.message {
      update = update.with_message(message.clone());
    }
    self.update(record, update, tx).await?;
    Ok(true)
  }

  /// 提交之后：子命令入队或重新调度
  /// After commit: release children or reschedule
  async fn follow_up(self: &Arc<Self>, followup: Followup) -> Result<()> {
    match followup {
      Followup::Completed(children) => {
        for child in children {
          let delay = child.delay;
          self.add(child, delay, false).await?;
        }
      }
      Followup::Repeat(record) => {
        let period = self.repeat_period(&record);
        self.add(record, period, false).await?;
      }
      Followup::Retry(record) => {
        let backoff = record.period.unwrap_or_default().saturating_add(record.delay);
        self.add(record, backoff, false).await?;
      }
    }
    Ok(())
  }

  fn repeat_period(&self, command: &Command) -> u64 {
    command
      .period
      .unwrap_or(duration_millis(self.config.default_repeat_interval))
  }

  async fn run_expired(self: &Arc<Self>, handler: &Arc<dyn CommandHandler>, command: &Command) {
    let mut working = command.clone();
    working.data = handler
      .unpack(working.data.clone())
      .unwrap_or(working.data);
    let ctx = self.context(None);
    let outcome = match handler.expired(&working, &ctx).await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(command = %command.name, command_id = %command.id_or_dash(), "Expired handler failed: {}", e);
        return;
      }
    };
    for child in outcome.into_commands() {
      let delay = child.delay;
      if let Err(e) = self.add(child, delay, true).await {
        warn!(command = %command.name, "Failed to add command from expired handler: {}", e);
      }
    }
  }

  async fn handle_error(
    self: &Arc<Self>,
    handler: &Arc<dyn CommandHandler>,
    command: Command,
    err: Error,
  ) {
    let name = command.name.clone();
    if let Err(e) = self.try_handle_error(handler, command, &err).await {
      warn!(command = %name, "Failed to handle error of command: {}", e);
    }
  }

  async fn try_handle_error(
    self: &Arc<Self>,
    handler: &Arc<dyn CommandHandler>,
    mut record: Command,
    err: &Error,
  ) -> Result<()> {
    let message = err.to_string();

    if record.retries > 1 && err.is_retriable() {
      let retries = record.retries - 1;
      warn!(
        command = %record.name,
        command_id = %record.id_or_dash(),
        retries,
        "Error in command, retrying: {}",
        err
      );
      let update = CommandUpdate::status(CommandStatus::Pending)
        .with_retries(retries)
        .with_message(message);
      self.update(&mut record, update, None).await?;
      let backoff = record.period.unwrap_or_default().saturating_add(record.delay);
      return match self.add(record, backoff, false).await {
        Ok(_) | Err(Error::ExecutorClosed) => Ok(()),
        Err(e) => Err(e),
      };
    }

    if record.retries > 1 {
      debug!(command = %record.name, command_id = %record.id_or_dash(), "Error is not retriable, skipping remaining retries");
    }
    handler.retry_finished(&record).await;
    let update = CommandUpdate::status(CommandStatus::Failed)
      .with_retries(0)
      .with_message(message);
    self.update(&mut record, update, None).await?;
    error!(
      command = %record.name,
      command_id = %record.id_or_dash(),
      "Error in command, no retries left: {}",
      err
    );

    let mut working = record.clone();
    working.data = handler
      .unpack(working.data.clone())
      .unwrap_or(working.data);
    let ctx = self.context(None);
    match handler.recover(&working, err, &ctx).await? {
      Outcome::Repeat => {
        self
          .set_status(&mut record, CommandStatus::Repeating, None)
          .await?;
        let period = self.repeat_period(&record);
        self.add(record, period, false).await?;
      }
      Outcome::Commands(children) => {
        for child in children {
          let delay = child.delay;
          self.add(child, delay, true).await?;
        }
      }
      Outcome::Empty | Outcome::Retry => {}
    }
    Ok(())
  }
}
