//! 执行引擎
//!
//! 每个周期依次完成三件事：
//!
//! 1. 超过截止时间的非终态实例转为 `TimedOut`
//! 2. 到期的 `Pending` / `Retrying` 实例申请准入，通过后转为 `Queued`
//! 3. `Queued` 实例调用动作，到期的 `WaitingForCompletion` 实例检查完成情况
//!
//! 所有状态写入都以版本号做条件更新，每次转换追加一条审计记录。
//! 写入冲突时重新加载实例，若期间收到取消请求则以 `Cancelled` 结束。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use automator_core::{
    ActionDescriptor, ActionFailure, ActionHandler, ActionOutcome, ActionRequest, AuditRecord,
    AuditRepository, AutomatorError, EngineConfig, Execution, ExecutionFailure,
    ExecutionRepository, ExecutionStatus, FailureKind, Result, TaskDefinitionRepository,
    TaskRunSummary,
};
use automator_dispatcher::retry::{self, RetryDecision};
use automator_dispatcher::{ActionRegistry, AdmissionController, AdmissionDecision, BucketKey};
use automator_infrastructure::StructuredLogger;

use crate::history;

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_parallel: usize,
    pub batch_size: i64,
    pub admission_recheck: Duration,
    pub max_waiting_per_bucket: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_parallel: config.max_parallel.max(1),
            batch_size: config.batch_size,
            admission_recheck: seconds(config.admission_recheck_seconds),
            max_waiting_per_bucket: config.max_waiting_per_bucket,
        }
    }
}

fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn later(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 一个引擎周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub timed_out: usize,
    pub admitted: usize,
    pub deferred: usize,
    pub succeeded: usize,
    pub waiting: usize,
    pub retried: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl CycleReport {
    fn count(&mut self, step: Step) {
        match step {
            Step::TimedOut => self.timed_out += 1,
            Step::Admitted => self.admitted += 1,
            Step::Deferred => self.deferred += 1,
            Step::Succeeded => self.succeeded += 1,
            Step::Waiting => self.waiting += 1,
            Step::Retried => self.retried += 1,
            Step::Failed => self.failed += 1,
            Step::Cancelled => self.cancelled += 1,
            Step::Conflict => self.conflicts += 1,
        }
    }

    fn record(&mut self, operation: &str, outcome: Result<Step>) {
        match outcome {
            Ok(step) => self.count(step),
            Err(e) => {
                self.errors += 1;
                StructuredLogger::log_system_error("execution_engine", operation, &e);
            }
        }
    }
}

/// 启动恢复的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 重建的准入槽位数
    pub restored_slots: usize,
    /// 重新调用的 `Running` 实例数
    pub resumed: usize,
    pub cycle: CycleReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    TimedOut,
    Admitted,
    Deferred,
    Succeeded,
    Waiting,
    Retried,
    Failed,
    Cancelled,
    Conflict,
}

impl Step {
    fn of(execution: &Execution) -> Self {
        match execution.status {
            ExecutionStatus::Queued => Step::Admitted,
            ExecutionStatus::Succeeded => Step::Succeeded,
            ExecutionStatus::WaitingForCompletion => Step::Waiting,
            ExecutionStatus::Retrying => Step::Retried,
            ExecutionStatus::TimedOut => Step::TimedOut,
            ExecutionStatus::Failed
                if execution
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.kind == FailureKind::Cancelled) =>
            {
                Step::Cancelled
            }
            ExecutionStatus::Failed => Step::Failed,
            ExecutionStatus::Pending => Step::Deferred,
            ExecutionStatus::Running => Step::Conflict,
        }
    }
}

/// 条件写入的结果
enum Committed {
    Stored(Execution),
    /// 写入冲突，期间收到取消请求，实例已以 `Cancelled` 结束
    Cancelled,
    /// 写入冲突，实例已被其他处理者推进
    Conflict,
}

impl Committed {
    fn step(&self) -> Step {
        match self {
            Committed::Stored(execution) => Step::of(execution),
            Committed::Cancelled => Step::Cancelled,
            Committed::Conflict => Step::Conflict,
        }
    }
}

enum CallResult {
    Outcome(ActionOutcome),
    DeadlineExceeded,
}

fn request_for(execution: &Execution) -> ActionRequest {
    ActionRequest {
        execution_id: execution.id.clone(),
        task_name: execution.task_name.clone(),
        target: execution.target.clone(),
        parameters: execution.parameters.clone(),
        attempt: execution.attempt,
        dry_run: execution.dry_run,
    }
}

fn cancelled_failure() -> ExecutionFailure {
    ExecutionFailure::new(FailureKind::Cancelled, "Cancelled", "执行已被取消")
}

/// 执行引擎
pub struct ExecutionEngine {
    registry: Arc<ActionRegistry>,
    task_repository: Arc<dyn TaskDefinitionRepository>,
    execution_repository: Arc<dyn ExecutionRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    admission: AdmissionController,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<ActionRegistry>,
        task_repository: Arc<dyn TaskDefinitionRepository>,
        execution_repository: Arc<dyn ExecutionRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        settings: EngineSettings,
    ) -> Self {
        let stale_after = settings.admission_recheck * 4;
        Self {
            admission: AdmissionController::new(settings.max_waiting_per_bucket, stale_after),
            registry,
            task_repository,
            execution_repository,
            audit_repository,
            settings,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// 按配置的周期循环运行，直到收到关闭信号
    pub async fn run(&self, cycle_interval: StdDuration, mut shutdown: broadcast::Receiver<()>) {
        match self.recover(Utc::now()).await {
            Ok(report) => info!(
                "执行引擎恢复完成: 重建槽位 {}, 重新调用 {}",
                report.restored_slots, report.resumed
            ),
            Err(e) => error!("执行引擎恢复失败: {}", e),
        }

        let mut ticker = tokio::time::interval(cycle_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report != CycleReport::default() => {
                            debug!("引擎周期完成: {:?}", report);
                        }
                        Ok(_) => {}
                        Err(e) => error!("引擎周期失败: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("执行引擎收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 进程启动时调用：重建准入槽位，并以相同的去重令牌重新处理 `Running` 实例
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let holders = self
            .execution_repository
            .list_by_status(&[
                ExecutionStatus::Queued,
                ExecutionStatus::Running,
                ExecutionStatus::WaitingForCompletion,
            ])
            .await?;

        let pairs: Vec<(&Execution, &ActionDescriptor)> = holders
            .iter()
            .filter_map(|e| self.registry.descriptor(&e.action).ok().map(|d| (e, d)))
            .collect();
        let restored_slots = self.admission.restore(pairs)?;

        let running: Vec<Execution> = holders
            .into_iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .collect();
        let resumed = running.len();
        if resumed > 0 {
            info!("恢复 {} 个中断的执行实例", resumed);
        }

        let mut cycle = CycleReport::default();
        for outcome in self.dispatch_all(running, now).await {
            cycle.record("recover", outcome);
        }

        Ok(RecoveryReport {
            restored_slots,
            resumed,
            cycle,
        })
    }

    /// 运行一个引擎周期
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let expired = self
            .execution_repository
            .list_expired(now, self.settings.batch_size)
            .await?;
        for execution in expired {
            let failure = ExecutionFailure::new(
                FailureKind::Timeout,
                "DeadlineExceeded",
                format!("超过截止时间 {}", execution.deadline.to_rfc3339()),
            );
            let outcome = self.finish(execution, failure, now).await;
            report.record("expire", outcome.map(|c| c.step()));
        }

        let waiting = self
            .execution_repository
            .list_due(
                &[ExecutionStatus::Pending, ExecutionStatus::Retrying],
                now,
                self.settings.batch_size,
            )
            .await?;
        let mut limits = HashMap::new();
        for execution in waiting {
            let outcome = self.admit_one(execution, now, &mut limits).await;
            report.record("admit", outcome);
        }

        let ready = self
            .execution_repository
            .list_due(
                &[ExecutionStatus::Queued, ExecutionStatus::WaitingForCompletion],
                now,
                self.settings.batch_size,
            )
            .await?;
        for outcome in self.dispatch_all(ready, now).await {
            report.record("dispatch", outcome);
        }

        Ok(report)
    }

    /// 取消执行实例
    ///
    /// 正在调用动作的实例只做标记，当前调用结束后以 `Cancelled` 结束；
    /// 其他非终态实例立即结束。
    pub async fn cancel(&self, execution_id: &str, now: DateTime<Utc>) -> Result<Execution> {
        for _ in 0..3 {
            let mut execution = self.load(execution_id).await?;
            if execution.status.is_terminal() {
                return Err(AutomatorError::InvalidTransition {
                    from: execution.status.as_str().to_string(),
                    to: ExecutionStatus::Failed.as_str().to_string(),
                });
            }

            if execution.status == ExecutionStatus::Running {
                execution.cancel_requested = true;
                match self.execution_repository.update(&execution).await {
                    Ok(stored) => {
                        info!("执行实例 {} 已标记取消，等待当前调用结束", execution_id);
                        return Ok(stored);
                    }
                    Err(AutomatorError::ConcurrentModification { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }

            let from = execution.finish_with_failure(cancelled_failure(), now)?;
            match self.execution_repository.update(&execution).await {
                Ok(stored) => {
                    self.record(&stored, from, Some("显式取消".to_string())).await?;
                    return Ok(stored);
                }
                Err(AutomatorError::ConcurrentModification { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AutomatorError::ConcurrentModification {
            id: execution_id.to_string(),
            expected_version: -1,
        })
    }

    /// 任务的运行历史，按触发点分组
    pub async fn run_history(&self, task_id: i64) -> Result<Vec<TaskRunSummary>> {
        history::run_history(self.execution_repository.as_ref(), task_id).await
    }

    async fn load(&self, execution_id: &str) -> Result<Execution> {
        self.execution_repository
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| AutomatorError::ExecutionNotFound {
                id: execution_id.to_string(),
            })
    }

    async fn task_limit(&self, task_id: i64, cache: &mut HashMap<i64, Option<u32>>) -> Result<Option<u32>> {
        if let Some(limit) = cache.get(&task_id) {
            return Ok(*limit);
        }
        let limit = self
            .task_repository
            .get_by_id(task_id)
            .await?
            .and_then(|task| task.concurrency_limit);
        cache.insert(task_id, limit);
        Ok(limit)
    }

    async fn admit_one(
        &self,
        execution: Execution,
        now: DateTime<Utc>,
        limits: &mut HashMap<i64, Option<u32>>,
    ) -> Result<Step> {
        if execution.cancel_requested {
            return Ok(self.finish(execution, cancelled_failure(), now).await?.step());
        }

        let descriptor = match self.registry.descriptor(&execution.action) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let failure = ExecutionFailure::new(FailureKind::Permanent, "ActionNotFound", e.to_string());
                return Ok(self.finish(execution, failure, now).await?.step());
            }
        };

        if execution.status == ExecutionStatus::Retrying && execution.retries_exhausted() {
            let failure = match &execution.failure {
                Some(last) => ExecutionFailure::new(FailureKind::RetriesExhausted, last.code.clone(), last.message.clone()),
                None => ExecutionFailure::new(FailureKind::RetriesExhausted, "RetriesExhausted", "重试次数已用尽"),
            };
            return Ok(self.finish(execution, failure, now).await?.step());
        }

        let limit = self.task_limit(execution.task_id, limits).await?;
        match self.admission.admit(&execution, descriptor, limit, now)? {
            AdmissionDecision::Accepted => {
                let execution_id = execution.id.clone();
                let mut execution = execution;
                let from = execution.transition(ExecutionStatus::Queued, now)?;
                let committed = self.commit(execution, from, None).await?;
                if !matches!(committed, Committed::Stored(_)) {
                    // 并发周期已把实例推进到占槽状态时，槽位归对方所有
                    let held_elsewhere = self
                        .execution_repository
                        .get_by_id(&execution_id)
                        .await?
                        .is_some_and(|latest| latest.status.holds_slot());
                    if !held_elsewhere {
                        self.admission.release(&execution_id)?;
                    }
                }
                Ok(committed.step())
            }
            AdmissionDecision::Deferred { position } => {
                let bucket = BucketKey::for_execution(&execution, descriptor);
                StructuredLogger::log_admission_deferred(&execution, &bucket.to_string(), position);

                let mut execution = execution;
                execution.next_attempt_at = Some(later(now, self.settings.admission_recheck));
                match self.execution_repository.update(&execution).await {
                    Ok(_) => Ok(Step::Deferred),
                    Err(AutomatorError::ConcurrentModification { .. }) => Ok(Step::Conflict),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn dispatch_all(&self, executions: Vec<Execution>, now: DateTime<Utc>) -> Vec<Result<Step>> {
        stream::iter(executions)
            .map(|execution| self.dispatch_one(execution, now))
            .buffer_unordered(self.settings.max_parallel)
            .collect()
            .await
    }

    /// 处理 `Queued`、`Running`（恢复）或 `WaitingForCompletion` 实例
    async fn dispatch_one(&self, execution: Execution, now: DateTime<Utc>) -> Result<Step> {
        if execution.cancel_requested {
            return Ok(self.finish(execution, cancelled_failure(), now).await?.step());
        }

        let handler = match self.registry.get(&execution.action) {
            Ok(handler) => handler,
            Err(e) => {
                let failure = ExecutionFailure::new(FailureKind::Permanent, "ActionNotFound", e.to_string());
                return Ok(self.finish(execution, failure, now).await?.step());
            }
        };

        let execution = if execution.status == ExecutionStatus::Queued {
            let mut execution = execution;
            let from = execution.transition(ExecutionStatus::Running, now)?;
            match self.commit(execution, from, None).await? {
                Committed::Stored(stored) => stored,
                other => return Ok(other.step()),
            }
        } else {
            execution
        };

        let call = self.call_handler(handler.as_ref(), &execution, now).await;
        match call {
            CallResult::Outcome(outcome) => {
                self.apply_outcome(execution, handler.descriptor(), outcome, now).await
            }
            CallResult::DeadlineExceeded => {
                let failure = ExecutionFailure::new(
                    FailureKind::Timeout,
                    "DeadlineExceeded",
                    "动作调用超过截止时间",
                );
                Ok(self.finish(execution, failure, now).await?.step())
            }
        }
    }

    /// 有完成令牌时检查完成情况，否则调用动作；调用时间不超过截止时间
    async fn call_handler(
        &self,
        handler: &dyn ActionHandler,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> CallResult {
        let request = request_for(execution);
        let budget = (execution.deadline - now).to_std().unwrap_or(StdDuration::ZERO);
        let call = async {
            match &execution.completion_token {
                Some(token) => handler.check_completion(&request, token).await,
                None => handler.invoke(&request).await,
            }
        };

        match tokio::time::timeout(budget, call).await {
            Ok(Ok(outcome)) => CallResult::Outcome(outcome),
            Ok(Err(e)) => {
                warn!("动作 {} 调用异常 (执行实例 {}): {}", execution.action, execution.id, e);
                CallResult::Outcome(ActionOutcome::Error(ActionFailure::transient(
                    "HandlerError",
                    e.to_string(),
                )))
            }
            Err(_) => CallResult::DeadlineExceeded,
        }
    }

    async fn apply_outcome(
        &self,
        mut execution: Execution,
        descriptor: &ActionDescriptor,
        outcome: ActionOutcome,
        now: DateTime<Utc>,
    ) -> Result<Step> {
        match outcome {
            ActionOutcome::Done(result) => {
                let from = execution.succeed(result, now)?;
                Ok(self.commit(execution, from, None).await?.step())
            }
            ActionOutcome::InProgress(_) if !descriptor.long_running => {
                let failure = ExecutionFailure::new(
                    FailureKind::Permanent,
                    "ContractViolation",
                    format!("动作 {} 不是长时间运行动作，不能返回完成令牌", descriptor.name),
                );
                Ok(self.finish(execution, failure, now).await?.step())
            }
            ActionOutcome::InProgress(token) => {
                let from = execution.transition(ExecutionStatus::WaitingForCompletion, now)?;
                execution.completion_token = Some(token);
                execution.next_attempt_at = Some(later(
                    now,
                    seconds(descriptor.completion_check_interval_seconds),
                ));
                Ok(self.commit(execution, from, None).await?.step())
            }
            ActionOutcome::Error(failure) => match retry::decide(descriptor, &execution, &failure) {
                RetryDecision::Retry { delay } => {
                    let from = execution.transition(ExecutionStatus::Retrying, now)?;
                    execution.failure = Some(ExecutionFailure::new(
                        FailureKind::Transient,
                        failure.code.clone(),
                        failure.message.clone(),
                    ));
                    let wait = Duration::from_std(delay).unwrap_or(Duration::MAX);
                    execution.next_attempt_at = Some(later(now, wait));
                    let committed = self.commit(execution, from, None).await?;
                    if let Committed::Stored(stored) = &committed {
                        StructuredLogger::log_execution_retry(stored, delay, &failure.message);
                    }
                    Ok(committed.step())
                }
                RetryDecision::Fail(kind) => {
                    let failure = ExecutionFailure::new(kind, failure.code, failure.message);
                    Ok(self.finish(execution, failure, now).await?.step())
                }
            },
        }
    }

    async fn finish(
        &self,
        mut execution: Execution,
        failure: ExecutionFailure,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let from = execution.finish_with_failure(failure, now)?;
        self.commit(execution, from, None).await
    }

    /// 条件写入并记录审计；冲突时按最新状态处理取消请求
    async fn commit(
        &self,
        execution: Execution,
        from: ExecutionStatus,
        detail: Option<String>,
    ) -> Result<Committed> {
        match self.execution_repository.update(&execution).await {
            Ok(stored) => {
                self.record(&stored, from, detail).await?;
                Ok(Committed::Stored(stored))
            }
            Err(AutomatorError::ConcurrentModification { .. }) => {
                self.resolve_conflict(&execution.id, execution.updated_at).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_conflict(&self, execution_id: &str, now: DateTime<Utc>) -> Result<Committed> {
        let Some(mut latest) = self.execution_repository.get_by_id(execution_id).await? else {
            return Ok(Committed::Conflict);
        };
        if latest.status.is_terminal() {
            self.admission.forget(execution_id)?;
            return Ok(Committed::Conflict);
        }
        if !latest.cancel_requested {
            debug!("执行实例 {} 已被并发修改，放弃本次写入", execution_id);
            return Ok(Committed::Conflict);
        }

        let from = latest.finish_with_failure(cancelled_failure(), now)?;
        match self.execution_repository.update(&latest).await {
            Ok(stored) => {
                self.record(&stored, from, Some("调用结束后应用取消请求".to_string()))
                    .await?;
                Ok(Committed::Cancelled)
            }
            Err(AutomatorError::ConcurrentModification { .. }) => Ok(Committed::Conflict),
            Err(e) => Err(e),
        }
    }

    /// 审计、日志和槽位释放
    async fn record(&self, stored: &Execution, from: ExecutionStatus, detail: Option<String>) -> Result<()> {
        self.audit_repository
            .append(&AuditRecord::for_transition(stored, Some(from), detail))
            .await?;
        StructuredLogger::log_execution_transition(stored, from);

        if stored.status.is_terminal() {
            self.admission.forget(&stored.id)?;
        } else if stored.status == ExecutionStatus::Retrying {
            self.admission.release(&stored.id)?;
        }
        Ok(())
    }
}
