mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Notify;

use automator_core::{
    ActionDescriptor, ActionFailure, ActionHandler, ActionOutcome, AuditRepository,
    AutomatorError, CompletionToken, ConcurrencyScope, EventTrigger, Execution,
    ExecutionRepository, ExecutionStatus, FailureKind, Result, RetryPolicy, TaskEvent,
};
use automator_worker::ExecutionEngine;

use common::{inventory, task, Harness, ScriptedAction};

const ACCOUNT_A: &str = "111111111111";
const ACCOUNT_B: &str = "222222222222";

fn done() -> ActionOutcome {
    ActionOutcome::Done(json!({"ok": true}))
}

fn as_handler(action: &Arc<ScriptedAction>) -> Arc<dyn ActionHandler> {
    action.clone()
}

#[tokio::test]
async fn partial_selection_creates_executions_for_healthy_scopes() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("report"), done()));
    let harness = Harness::new(
        vec![as_handler(&action)],
        inventory(&[(ACCOUNT_A, Some(3)), (ACCOUNT_B, None)]),
    );
    let task = harness.register(task("report-all", "report", &[ACCOUNT_A, ACCOUNT_B])).await;

    let report = harness.scheduler.trigger_now(task.id, Utc::now()).await.unwrap();
    assert_eq!(report.created.len(), 3);
    assert_eq!(report.selection_errors.len(), 1);
    assert_eq!(report.selection_errors[0].1.scope.account, ACCOUNT_B);

    let executions = harness.executions_of(task.id).await;
    assert_eq!(executions.len(), 3);
    assert!(executions.iter().all(|e| e.target.account == ACCOUNT_A));
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Pending));
}

#[tokio::test]
async fn reevaluating_a_tick_creates_nothing_new() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("report"), done()));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(4))]));

    let definition = task("every-minute", "report", &[ACCOUNT_A])
        .with_cron("* * * * *")
        .with_event(EventTrigger::new("inventory", "InstanceTagged"));
    let task = harness.register(definition).await;
    let now = task.created_at + Duration::minutes(3);

    let first = harness.scheduler.evaluate(now).await.unwrap();
    assert_eq!(first.created.len(), 4);
    let second = harness.scheduler.evaluate(now).await.unwrap();
    assert!(second.created.is_empty());
    assert_eq!(harness.executions_of(task.id).await.len(), 4);

    // 同一事件重复投递只创建一次
    let event = TaskEvent::new("inventory", "InstanceTagged").in_scope(ACCOUNT_A, common::REGION);
    let by_event = harness.scheduler.handle_event(&event, now).await.unwrap();
    assert_eq!(by_event.created.len(), 4);
    let replayed = harness.scheduler.handle_event(&event, now).await.unwrap();
    assert!(replayed.created.is_empty());
    assert_eq!(replayed.duplicates, 4);
    assert_eq!(harness.executions_of(task.id).await.len(), 8);
}

#[tokio::test]
async fn admission_limit_holds_back_extra_executions() {
    let descriptor = ActionDescriptor::new("snapshot")
        .with_concurrency(ConcurrencyScope::Global, Some(2), None)
        .long_running(60);
    let action = Arc::new(
        ScriptedAction::new(descriptor, ActionOutcome::InProgress(CompletionToken::new("snap-1")))
            .with_check_outcome(done()),
    );
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(5))]));
    let task = harness.register(task("snapshots", "snapshot", &[ACCOUNT_A])).await;

    let now = Utc::now();
    harness.scheduler.trigger_now(task.id, now).await.unwrap();

    let report = harness.engine.run_cycle(now).await.unwrap();
    assert_eq!(report.admitted, 2);
    assert_eq!(report.deferred, 3);
    assert_eq!(report.waiting, 2);
    assert_eq!(
        harness
            .count_in(task.id, &[ExecutionStatus::Running, ExecutionStatus::WaitingForCompletion])
            .await,
        2
    );
    assert_eq!(harness.count_in(task.id, &[ExecutionStatus::Pending]).await, 3);
    assert_eq!(harness.engine.admission().global_running("snapshot"), 2);

    // 槽位未释放前，再次检查仍然推迟
    let recheck = harness.engine.run_cycle(now + Duration::seconds(20)).await.unwrap();
    assert_eq!(recheck.admitted, 0);
    assert_eq!(harness.count_in(task.id, &[ExecutionStatus::Pending]).await, 3);

    // 完成检查到期，前两个完成并释放槽位
    let polled = harness.engine.run_cycle(now + Duration::seconds(61)).await.unwrap();
    assert_eq!(polled.succeeded, 2);
    assert_eq!(harness.engine.admission().global_running("snapshot"), 0);

    let next = harness.engine.run_cycle(now + Duration::seconds(90)).await.unwrap();
    assert_eq!(next.admitted, 2);
    assert_eq!(harness.count_in(task.id, &[ExecutionStatus::Pending]).await, 1);
}

#[tokio::test]
async fn concurrency_limit_never_exceeded_under_load() {
    let descriptor =
        ActionDescriptor::new("resize").with_concurrency(ConcurrencyScope::Account, Some(3), None);
    let action = Arc::new(ScriptedAction::new(descriptor, done()).with_delay(StdDuration::from_millis(20)));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(10))]));
    let task = harness.register(task("resize", "resize", &[ACCOUNT_A])).await;

    let start = Utc::now();
    harness.scheduler.trigger_now(task.id, start).await.unwrap();

    for cycle in 0..10 {
        let now = start + Duration::seconds(16 * cycle);
        harness.engine.run_cycle(now).await.unwrap();
        assert!(harness.engine.admission().global_running("resize") <= 3);
    }

    assert_eq!(harness.count_in(task.id, &[ExecutionStatus::Succeeded]).await, 10);
    assert_eq!(action.invocations(), 10);
    assert!(action.max_in_flight() <= 3);
    assert!(action.max_in_flight() >= 2);
}

/// 读取到期实例后让出一次，使并发的两个周期拿到同一份快照
struct SnapshotThenYield {
    inner: Arc<dyn ExecutionRepository>,
}

#[async_trait]
impl ExecutionRepository for SnapshotThenYield {
    async fn create_if_absent(&self, execution: &Execution) -> Result<Option<Execution>> {
        self.inner.create_if_absent(execution).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Execution>> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Execution>> {
        self.inner.find_by_dedup_key(dedup_key).await
    }

    async fn update(&self, execution: &Execution) -> Result<Execution> {
        self.inner.update(execution).await
    }

    async fn list_due(
        &self,
        statuses: &[ExecutionStatus],
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>> {
        let due = self.inner.list_due(statuses, now, limit).await?;
        tokio::task::yield_now().await;
        Ok(due)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Execution>> {
        self.inner.list_expired(now, limit).await
    }

    async fn list_by_status(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        self.inner.list_by_status(statuses).await
    }

    async fn list_by_task(&self, task_id: i64) -> Result<Vec<Execution>> {
        self.inner.list_by_task(task_id).await
    }

    async fn count_active_for_task(&self, task_id: i64) -> Result<i64> {
        self.inner.count_active_for_task(task_id).await
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        keep_failed: bool,
    ) -> Result<Vec<String>> {
        self.inner.purge_terminal_before(cutoff, keep_failed).await
    }
}

#[tokio::test]
async fn concurrent_cycles_never_process_an_execution_twice() {
    let descriptor =
        ActionDescriptor::new("resize").with_concurrency(ConcurrencyScope::Account, Some(3), None);
    let action = Arc::new(ScriptedAction::new(descriptor, done()).with_delay(StdDuration::from_millis(20)));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(10))]));
    let task = harness.register(task("resize", "resize", &[ACCOUNT_A])).await;

    let engine = ExecutionEngine::new(
        harness.registry.clone(),
        harness.tasks.clone(),
        Arc::new(SnapshotThenYield {
            inner: harness.executions.clone(),
        }),
        harness.audit.clone(),
        common::settings(),
    );

    let start = Utc::now();
    harness.scheduler.trigger_now(task.id, start).await.unwrap();

    // 两个周期读到同一批 Pending 实例，后写入的一方必须冲突而不是重复准入
    let (first, second) = tokio::join!(engine.run_cycle(start), engine.run_cycle(start));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.admitted + second.admitted, 3);
    assert!(first.conflicts + second.conflicts >= 3);
    assert_eq!(engine.admission().global_running("resize"), 0);

    for cycle in 1..10 {
        let now = start + Duration::seconds(16 * cycle);
        let (a, b) = tokio::join!(engine.run_cycle(now), engine.run_cycle(now));
        a.unwrap();
        b.unwrap();
        assert!(engine.admission().global_running("resize") <= 3);
    }

    assert_eq!(harness.count_in(task.id, &[ExecutionStatus::Succeeded]).await, 10);
    assert_eq!(action.invocations(), 10);
    assert!(action.max_in_flight() <= 3);

    let mut seen = action.seen_execution_ids.lock().unwrap().clone();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 10);
}

#[tokio::test]
async fn synchronous_action_returning_token_fails_permanently() {
    let action = Arc::new(ScriptedAction::new(
        ActionDescriptor::new("sync-only"),
        ActionOutcome::InProgress(CompletionToken::new("t")),
    ));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("sync", "sync-only", &[ACCOUNT_A])).await;

    let now = Utc::now();
    harness.scheduler.trigger_now(task.id, now).await.unwrap();
    let report = harness.engine.run_cycle(now).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.waiting, 0);

    let execution = &harness.executions_of(task.id).await[0];
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.completion_token.is_none());
    let failure = execution.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.code, "ContractViolation");

    // 不会再被轮询
    harness.engine.run_cycle(now + Duration::seconds(120)).await.unwrap();
    assert_eq!(action.checks(), 0);
    assert_eq!(action.invocations(), 1);
    assert_eq!(harness.engine.admission().global_running("sync-only"), 0);
}

#[tokio::test]
async fn transient_errors_stop_at_max_attempts() {
    let descriptor = ActionDescriptor::new("flaky").with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1_000,
        max_delay_ms: 4_000,
        multiplier: 2.0,
        jitter_factor: 0.0,
    });
    let action = Arc::new(ScriptedAction::new(
        descriptor,
        ActionOutcome::Error(ActionFailure::transient("Throttling", "rate exceeded")),
    ));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("flaky", "flaky", &[ACCOUNT_A])).await;

    let start = Utc::now();
    harness.scheduler.trigger_now(task.id, start).await.unwrap();

    let mut delays = Vec::new();
    for cycle in 0..8 {
        let now = start + Duration::seconds(10 * cycle);
        harness.engine.run_cycle(now).await.unwrap();
        let execution = harness.executions_of(task.id).await.remove(0);
        if execution.status == ExecutionStatus::Retrying {
            if let Some(at) = execution.next_attempt_at {
                delays.push(at - now);
            }
        }
    }

    let execution = harness.executions_of(task.id).await.remove(0);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.attempt, 3);
    let failure = execution.failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(failure.code, "Throttling");
    assert_eq!(action.invocations(), 3);

    assert_eq!(delays, vec![Duration::seconds(1), Duration::seconds(2)]);

    let trail = harness.audit.list_for_execution(&execution.id).await.unwrap();
    let retries = trail
        .iter()
        .filter(|r| r.to_status == ExecutionStatus::Retrying)
        .count();
    assert_eq!(retries, 2);
    let last = trail.last().unwrap();
    assert_eq!(last.to_status, ExecutionStatus::Failed);
    assert_eq!(last.failure_kind, Some(FailureKind::RetriesExhausted));
    assert!(last.snapshot.is_some());
}

#[tokio::test]
async fn permanent_error_fails_without_retry() {
    let action = Arc::new(ScriptedAction::new(
        ActionDescriptor::new("strict"),
        ActionOutcome::Error(ActionFailure::permanent("InvalidParameterValue", "bad size")),
    ));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("strict", "strict", &[ACCOUNT_A])).await;

    let now = Utc::now();
    harness.scheduler.trigger_now(task.id, now).await.unwrap();
    let report = harness.engine.run_cycle(now).await.unwrap();
    assert_eq!(report.failed, 1);

    let execution = harness.executions_of(task.id).await.remove(0);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.failure.unwrap().kind, FailureKind::Permanent);
    assert_eq!(action.invocations(), 1);
    assert_eq!(harness.engine.admission().global_running("strict"), 0);
}

#[tokio::test]
async fn completion_replay_after_restart_does_not_reinvoke() {
    let descriptor = ActionDescriptor::new("export").long_running(30);
    let before = Arc::new(ScriptedAction::new(
        descriptor.clone(),
        ActionOutcome::InProgress(CompletionToken::new("export-42")),
    ));
    let harness = Harness::new(vec![as_handler(&before)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("export", "export", &[ACCOUNT_A])).await;

    let now = Utc::now();
    harness.scheduler.trigger_now(task.id, now).await.unwrap();
    harness.engine.run_cycle(now).await.unwrap();
    let waiting = harness.executions_of(task.id).await.remove(0);
    assert_eq!(waiting.status, ExecutionStatus::WaitingForCompletion);
    assert_eq!(waiting.completion_token, Some(CompletionToken::new("export-42")));

    let result = ActionOutcome::Done(json!({"archive": "s3://bucket/export-42"}));
    let after = Arc::new(ScriptedAction::new(descriptor.clone(), result.clone()).with_check_outcome(result));
    let engine = harness.restarted_engine(vec![as_handler(&after)]);

    let recovery = engine.recover(now).await.unwrap();
    assert_eq!(recovery.restored_slots, 1);
    assert_eq!(recovery.resumed, 0);

    engine.run_cycle(now + Duration::seconds(31)).await.unwrap();
    let finished = harness.executions_of(task.id).await.remove(0);
    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.result, Some(json!({"archive": "s3://bucket/export-42"})));
    assert_eq!(after.invocations(), 0);
    assert_eq!(after.checks(), 1);
    assert_eq!(before.invocations(), 1);
    assert_eq!(engine.admission().global_running("export"), 0);
}

#[tokio::test]
async fn running_execution_is_reinvoked_with_same_token_after_restart() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("tag"), done()));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("tag", "tag", &[ACCOUNT_A])).await;

    let now = Utc::now();
    let created = harness.scheduler.trigger_now(task.id, now).await.unwrap().created.remove(0);

    // 模拟调用过程中进程退出
    let mut queued = created.clone();
    queued.transition(ExecutionStatus::Queued, now).unwrap();
    let mut running = harness.executions.update(&queued).await.unwrap();
    running.transition(ExecutionStatus::Running, now).unwrap();
    harness.executions.update(&running).await.unwrap();

    let engine = harness.restarted_engine(vec![as_handler(&action)]);
    let recovery = engine.recover(now).await.unwrap();
    assert_eq!(recovery.resumed, 1);
    assert_eq!(recovery.cycle.succeeded, 1);

    let seen = action.seen_execution_ids.lock().unwrap().clone();
    assert_eq!(seen, vec![created.id.clone()]);
    let finished = harness.executions.get_by_id(&created.id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.attempt, 1);
}

#[tokio::test]
async fn expired_executions_time_out() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("slow"), done()));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(2))]));
    let task = harness
        .register(task("slow", "slow", &[ACCOUNT_A]).with_timeout_seconds(60))
        .await;

    let now = Utc::now();
    harness.scheduler.trigger_now(task.id, now).await.unwrap();
    let report = harness.engine.run_cycle(now + Duration::seconds(61)).await.unwrap();
    assert_eq!(report.timed_out, 2);
    assert_eq!(action.invocations(), 0);

    for execution in harness.executions_of(task.id).await {
        assert_eq!(execution.status, ExecutionStatus::TimedOut);
        let trail = harness.audit.list_for_execution(&execution.id).await.unwrap();
        assert_eq!(trail.last().unwrap().failure_kind, Some(FailureKind::Timeout));
    }
}

#[tokio::test]
async fn cancel_pending_execution_fails_immediately() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("tag"), done()));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("tag", "tag", &[ACCOUNT_A])).await;

    let now = Utc::now();
    let created = harness.scheduler.trigger_now(task.id, now).await.unwrap().created.remove(0);
    let cancelled = harness.engine.cancel(&created.id, now).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Failed);
    assert_eq!(cancelled.failure.unwrap().kind, FailureKind::Cancelled);

    harness.engine.run_cycle(now).await.unwrap();
    assert_eq!(action.invocations(), 0);

    let again = harness.engine.cancel(&created.id, now).await.unwrap_err();
    assert!(matches!(again, AutomatorError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancel_running_execution_applies_after_call() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let action = Arc::new(
        ScriptedAction::new(ActionDescriptor::new("tag"), done())
            .with_gate(started.clone(), release.clone()),
    );
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(1))]));
    let task = harness.register(task("tag", "tag", &[ACCOUNT_A])).await;

    let now = Utc::now();
    let created = harness.scheduler.trigger_now(task.id, now).await.unwrap().created.remove(0);

    let engine = harness.engine.clone();
    let cycle = tokio::spawn(async move { engine.run_cycle(now).await });

    started.notified().await;
    let marked = harness.engine.cancel(&created.id, now).await.unwrap();
    assert_eq!(marked.status, ExecutionStatus::Running);
    assert!(marked.cancel_requested);
    release.notify_one();

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(action.invocations(), 1);

    let finished = harness.executions.get_by_id(&created.id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Failed);
    assert_eq!(finished.failure.unwrap().kind, FailureKind::Cancelled);
    assert_eq!(harness.engine.admission().global_running("tag"), 0);
}

#[tokio::test]
async fn run_history_groups_outcomes_by_tick() {
    let action = Arc::new(ScriptedAction::new(ActionDescriptor::new("report"), done()));
    let harness = Harness::new(vec![as_handler(&action)], inventory(&[(ACCOUNT_A, Some(2))]));
    let task = harness.register(task("report", "report", &[ACCOUNT_A])).await;

    let first = Utc::now();
    harness.scheduler.trigger_now(task.id, first).await.unwrap();
    harness.engine.run_cycle(first).await.unwrap();

    let second = first + Duration::minutes(1);
    harness.scheduler.trigger_now(task.id, second).await.unwrap();

    let history = harness.engine.run_history(task.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].tick, format!("manual:{}", second.to_rfc3339()));
    assert_eq!(history[0].in_progress, 2);
    assert!(!history[0].is_finished());
    assert_eq!(history[1].succeeded, 2);
    assert!(history[1].is_finished());
    assert!(history[1].outcomes.iter().all(|o| o.attempts == 1));
}
