//! 测试重试预算、失败恢复与事务回滚
mod common;

use cmdq::base::CommandStore;
use cmdq::command::{Command, CommandStatus};
use cmdq::operation::{MemoryOperationTracker, OperationStatus, OperationTracker};
use common::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_with_budget_is_rescheduled_after_backoff() {
  init_tracing();
  let handler = ScriptedHandler::new(
    Command::new("flaky")
      .with_retries(3)
      .with_period(Duration::from_millis(300)),
    Behavior::Fail,
  );
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), resolver_with(vec![handler.clone()]));
  executor.start().unwrap();

  let command = executor
    .add(handler.defaults_command(), Duration::ZERO, true)
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  assert!(eventually(Duration::from_secs(2), || handler.execution_count() >= 1).await);
  let record = wait_for_status(store.as_ref(), &id, CommandStatus::Pending, Duration::from_secs(1)).await;
  assert_eq!(record.retries, 2);
  assert_eq!(record.message.as_deref(), Some("Execution error: flaky failed"));

  assert!(eventually(Duration::from_secs(2), || handler.execution_count() >= 2).await);
  let times = handler.execution_times();
  assert!(times[1] - times[0] >= Duration::from_millis(300));

  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_retry_finishes_without_reschedule() {
  init_tracing();
  let handler = ScriptedHandler::new(Command::new("once").with_retries(1), Behavior::Fail);
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), resolver_with(vec![handler.clone()]));
  executor.start().unwrap();

  let command = executor
    .add(handler.defaults_command(), Duration::ZERO, true)
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  let record = wait_for_status(store.as_ref(), &id, CommandStatus::Failed, Duration::from_secs(2)).await;
  assert_eq!(record.retries, 0);
  tokio::time::sleep(Duration::from_millis(300)).await;

  assert_eq!(handler.execution_count(), 1);
  assert_eq!(handler.retry_finished.load(Ordering::SeqCst), 1);
  assert_eq!(handler.recovers.load(Ordering::SeqCst), 1);
  assert_eq!(executor.live_count(), 0);

  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transactional_failure_rolls_back_and_recovers_once() {
  init_tracing();
  let handler = ScriptedHandler::new(
    Command::new("B")
      .with_retries(3)
      .with_transactional(true)
      .with_period(Duration::from_millis(50)),
    Behavior::InsertThenFail,
  );
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), resolver_with(vec![handler.clone()]));
  executor.start().unwrap();

  let command = executor
    .add(handler.defaults_command(), Duration::ZERO, true)
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  let record = wait_for_status(store.as_ref(), &id, CommandStatus::Failed, Duration::from_secs(3)).await;
  assert_eq!(record.retries, 0);
  assert!(eventually(Duration::from_secs(1), || handler.recovers.load(Ordering::SeqCst) == 1).await);

  assert_eq!(
    store.status_history(&id),
    vec![
      (CommandStatus::Started, None),
      (CommandStatus::Pending, Some(2)),
      (CommandStatus::Started, None),
      (CommandStatus::Pending, Some(1)),
      (CommandStatus::Started, None),
      (CommandStatus::Failed, Some(0)),
    ]
  );
  assert_eq!(handler.execution_count(), 3);

  // 回滚后没有任何子命令被持久化
  // Nothing inserted inside the rolled back attempts survived
  let all = store.memory().all_commands().await;
  assert_eq!(all.len(), 1);
  assert!(all.iter().all(|c| c.name != "orphan"));

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(handler.recovers.load(Ordering::SeqCst), 1);
  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_outcome_consumes_budget_then_completes() {
  init_tracing();
  let handler = ScriptedHandler::new(
    Command::new("poller")
      .with_retries(3)
      .with_period(Duration::from_millis(30)),
    Behavior::Retry,
  );
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), resolver_with(vec![handler.clone()]));
  executor.start().unwrap();

  let command = executor
    .add(handler.defaults_command(), Duration::ZERO, true)
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  wait_for_status(store.as_ref(), &id, CommandStatus::Completed, Duration::from_secs(2)).await;
  assert_eq!(handler.execution_count(), 3);
  assert_eq!(handler.retry_finished.load(Ordering::SeqCst), 1);
  assert_eq!(handler.recovers.load(Ordering::SeqCst), 0);

  let retries: Vec<u32> = handler.executed_commands().iter().map(|c| c.retries).collect();
  assert_eq!(retries, vec![3, 2, 1]);

  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_recover_marks_operation_failed() {
  init_tracing();

  /// 仅实现 execute 的处理器，使用默认 recover
  struct AlwaysFails;

  #[async_trait::async_trait]
  impl cmdq::handler::CommandHandler for AlwaysFails {
    fn defaults(&self) -> Command {
      Command::new("publishCommand")
    }

    async fn execute(
      &self,
      _command: &mut Command,
      _ctx: &cmdq::handler::CommandContext<'_>,
    ) -> cmdq::error::Result<cmdq::command::Outcome> {
      Err(cmdq::error::Error::execution("node unreachable"))
    }
  }

  let mut resolver = cmdq::resolver::CommandResolver::new();
  resolver.register(Arc::new(AlwaysFails));
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), Arc::new(resolver));
  let tracker = Arc::new(MemoryOperationTracker::new());
  tracker.start("op-42").unwrap();
  executor.set_operation_tracker(tracker.clone()).unwrap();
  executor.start().unwrap();

  let command = executor
    .add(
      Command::new("publishCommand").with_data(json!({"operationId": "op-42"})),
      Duration::ZERO,
      true,
    )
    .await
    .unwrap();
  wait_for_status(
    store.as_ref(),
    command.id.as_deref().unwrap(),
    CommandStatus::Failed,
    Duration::from_secs(2),
  )
  .await;

  let mut status = None;
  for _ in 0..100 {
    status = tracker.status("op-42").await.unwrap();
    if matches!(status, Some(OperationStatus::Failed { .. })) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  match status {
    Some(OperationStatus::Failed { message }) => assert!(message.contains("node unreachable")),
    other => panic!("unexpected operation status: {other:?}"),
  }

  assert_eq!(store.get_commands_with_status(&[CommandStatus::Failed], &[]).await.unwrap().len(), 1);
  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_commit_is_retried_without_partial_children() {
  init_tracing();
  let parent = ScriptedHandler::new(
    Command::new("publish")
      .with_retries(3)
      .with_transactional(true)
      .with_period(Duration::from_millis(300)),
    Behavior::Continue,
  );
  let child = ScriptedHandler::new(Command::new("child"), Behavior::Succeed);
  let store = Arc::new(RecordingStore::new());
  store.failing_commits.store(1, Ordering::SeqCst);
  let executor = executor(
    test_config(),
    store.clone(),
    resolver_with(vec![parent.clone(), child.clone()]),
  );
  executor.start().unwrap();

  let command = executor
    .add(
      parent.defaults_command().with_sequence(["child"]),
      Duration::ZERO,
      true,
    )
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  // 第一次提交失败：按执行错误处理，子命令没有留下
  // The first commit fails: handled like an execution error, no child left behind
  let record = wait_for_status(store.as_ref(), &id, CommandStatus::Pending, Duration::from_secs(2)).await;
  assert_eq!(record.retries, 2);
  assert!(record
    .message
    .as_deref()
    .is_some_and(|m| m.contains("serialization failure on commit")));
  assert_eq!(parent.execution_count(), 1);
  assert_eq!(store.memory().len().await, 1);
  assert_eq!(child.execution_count(), 0);

  wait_for_status(store.as_ref(), &id, CommandStatus::Completed, Duration::from_secs(2)).await;
  assert!(eventually(Duration::from_secs(2), || child.execution_count() == 1).await);
  assert_eq!(parent.execution_count(), 2);
  assert_eq!(child.executed_commands()[0].parent_id.as_deref(), Some(id.as_str()));

  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(child.execution_count(), 1);
  assert_eq!(store.memory().len().await, 2);
  assert_eq!(parent.recovers.load(Ordering::SeqCst), 0);
  assert!(store.status_history(&id).contains(&(CommandStatus::Pending, Some(2))));
  executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unresolved_child_fails_without_retrying() {
  init_tracing();
  let handler = ScriptedHandler::new(
    Command::new("dispatch").with_retries(3),
    Behavior::ContinueToUnknown,
  );
  let store = Arc::new(RecordingStore::new());
  let executor = executor(test_config(), store.clone(), resolver_with(vec![handler.clone()]));
  executor.start().unwrap();

  let command = executor
    .add(handler.defaults_command(), Duration::ZERO, true)
    .await
    .unwrap();
  let id = command.id.clone().unwrap();

  let record = wait_for_status(store.as_ref(), &id, CommandStatus::Failed, Duration::from_secs(2)).await;
  assert_eq!(record.retries, 0);
  assert_eq!(
    record.message.as_deref(),
    Some("Unresolved command: notRegistered")
  );
  assert!(eventually(Duration::from_secs(1), || handler.recovers.load(Ordering::SeqCst) == 1).await);

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(handler.execution_count(), 1);
  assert_eq!(handler.retry_finished.load(Ordering::SeqCst), 1);
  assert_eq!(
    store.status_history(&id),
    vec![(CommandStatus::Started, None), (CommandStatus::Failed, Some(0))]
  );
  executor.shutdown().await;
}
