//! 任务调度器
//!
//! 周期性评估全部活跃任务：CRON到期的任务解析目标资源，并为每个
//! (任务, 目标) 创建一个执行实例。去重键由任务ID、目标键和触发点组成，
//! 同一触发点重复评估不会创建新实例。
//!
//! 单个任务的失败（参数不合法、动作未注册、存储错误）只记录在评估报告中，
//! 不影响其他任务。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use automator_core::{
    AuditRecord, AuditRepository, AutomatorError, Execution, ExecutionRepository, ExecutionSeed,
    Result, ScopeKey, SelectionError, TaskDefinition, TaskDefinitionRepository, TaskEvent,
    TriggerSource,
};
use automator_infrastructure::StructuredLogger;

use crate::action_registry::ActionRegistry;
use crate::cron_utils::CronScheduler;
use crate::resource_selector::ResourceSelector;

/// 单个任务评估失败
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvaluationError {
    pub task_id: i64,
    pub task_name: String,
    pub message: String,
    pub permanent: bool,
}

/// 一轮评估的结果
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    /// 本轮触发的任务数
    pub fired_tasks: usize,
    /// 新创建的执行实例
    pub created: Vec<Execution>,
    /// 去重跳过的 (任务, 目标, 触发点)
    pub duplicates: usize,
    pub selection_errors: Vec<(i64, SelectionError)>,
    pub task_errors: Vec<TaskEvaluationError>,
}

impl EvaluationReport {
    fn merge(&mut self, other: EvaluationReport) {
        self.fired_tasks += other.fired_tasks;
        self.created.extend(other.created);
        self.duplicates += other.duplicates;
        self.selection_errors.extend(other.selection_errors);
        self.task_errors.extend(other.task_errors);
    }

    fn record_failure(&mut self, task: &TaskDefinition, error: &AutomatorError) {
        StructuredLogger::log_task_evaluation_failed(task.id, &task.name, error);
        self.task_errors.push(TaskEvaluationError {
            task_id: task.id,
            task_name: task.name.clone(),
            message: error.to_string(),
            permanent: error.is_permanent(),
        });
    }
}

pub struct TaskScheduler {
    task_repo: Arc<dyn TaskDefinitionRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    audit_repo: Arc<dyn AuditRepository>,
    registry: Arc<ActionRegistry>,
    selector: ResourceSelector,
    catch_up_grace: Duration,
}

impl TaskScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskDefinitionRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        audit_repo: Arc<dyn AuditRepository>,
        registry: Arc<ActionRegistry>,
        selector: ResourceSelector,
        catch_up_grace: Duration,
    ) -> Self {
        Self {
            task_repo,
            execution_repo,
            audit_repo,
            registry,
            selector,
            catch_up_grace,
        }
    }

    /// 评估全部活跃任务的CRON计划
    #[instrument(skip(self))]
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let tasks = self.task_repo.list_active().await?;
        let mut report = EvaluationReport::default();

        for task in tasks {
            let Some(expr) = task.schedule.cron.as_deref() else {
                continue;
            };
            let cron = match task
                .tz()
                .and_then(|tz| CronScheduler::new(expr).map(|cron| cron.in_timezone(tz)))
            {
                Ok(cron) => cron,
                Err(e) => {
                    report.record_failure(&task, &e);
                    continue;
                }
            };

            let since = task.last_fired_at.unwrap_or(task.created_at);
            let Some(due) = cron.due_tick(since, now) else {
                continue;
            };
            if due.is_overdue(now, self.catch_up_grace) {
                warn!(
                    "任务 {} 错过了 {} 个触发点，最早的触发点 {} 已超过宽限期，合并到 {}",
                    task.name, due.missed, due.earliest, due.tick
                );
            }

            let tick = due.tick.to_rfc3339();
            match self
                .fire(&task, &tick, TriggerSource::Schedule, task.scope.scopes(), now)
                .await
            {
                Ok(fired) => {
                    report.merge(fired);
                    if let Err(e) = self.task_repo.set_last_fired(task.id, due.tick).await {
                        report.record_failure(&task, &e);
                    }
                }
                Err(e) => {
                    report.record_failure(&task, &e);
                    // 参数等永久错误在本触发点不会恢复，跳过该触发点
                    if e.is_permanent() {
                        if let Err(e) = self.task_repo.set_last_fired(task.id, due.tick).await {
                            report.record_failure(&task, &e);
                        }
                    }
                }
            }
        }

        if report.fired_tasks > 0 {
            info!(
                "调度评估完成: 触发任务 {} 个, 新建执行实例 {} 个, 去重 {} 个, 部分失败范围 {} 个, 失败任务 {} 个",
                report.fired_tasks,
                report.created.len(),
                report.duplicates,
                report.selection_errors.len(),
                report.task_errors.len()
            );
        }
        Ok(report)
    }

    /// 处理外部事件：匹配事件触发器的活跃任务立即触发，范围按事件收窄
    #[instrument(skip(self, event), fields(event.id = %event.id, event.type = %event.event_type))]
    pub async fn handle_event(&self, event: &TaskEvent, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let tasks = self.task_repo.list_active().await?;
        let mut report = EvaluationReport::default();
        let tick = format!("event:{}", event.id);

        for task in tasks.iter().filter(|t| t.is_triggered_by(event)) {
            let scopes = task
                .scope
                .narrowed(event.account.as_deref(), event.region.as_deref());
            if scopes.is_empty() {
                debug!("事件 {} 不在任务 {} 的范围内", event.id, task.name);
                continue;
            }

            match self.fire(task, &tick, TriggerSource::Event, scopes, now).await {
                Ok(fired) => report.merge(fired),
                Err(e) => report.record_failure(task, &e),
            }
        }
        Ok(report)
    }

    /// 手动触发任务
    #[instrument(skip(self))]
    pub async fn trigger_now(&self, task_id: i64, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(AutomatorError::TaskNotFound { id: task_id })?;
        if !task.is_active() {
            return Err(AutomatorError::TaskInactive { id: task_id });
        }

        let tick = format!("manual:{}", now.to_rfc3339());
        self.fire(&task, &tick, TriggerSource::Manual, task.scope.scopes(), now)
            .await
    }

    /// 为任务在给定范围内的每个目标创建执行实例
    async fn fire(
        &self,
        task: &TaskDefinition,
        tick: &str,
        source: TriggerSource,
        scopes: Vec<ScopeKey>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationReport> {
        let parameters = self.registry.validate_task(task)?;
        let max_attempts = self.registry.descriptor(&task.action)?.retry.max_attempts;
        let selection = self.selector.select_in(&task.scope, scopes).await?;

        let mut report = EvaluationReport {
            fired_tasks: 1,
            selection_errors: selection
                .errors
                .into_iter()
                .map(|e| (task.id, e))
                .collect(),
            ..Default::default()
        };

        for target in selection.targets {
            let execution = Execution::new(
                ExecutionSeed {
                    task,
                    target,
                    parameters: parameters.clone(),
                    source,
                    tick: tick.to_string(),
                    max_attempts,
                },
                now,
            );

            match self.execution_repo.create_if_absent(&execution).await? {
                Some(created) => {
                    let record = AuditRecord::for_transition(
                        &created,
                        None,
                        Some(format!("由 {} 触发", source.as_str())),
                    );
                    self.audit_repo.append(&record).await?;
                    StructuredLogger::log_execution_created(&created);
                    report.created.push(created);
                }
                None => {
                    debug!("执行实例已存在，跳过: {}", execution.dedup_key);
                    report.duplicates += 1;
                }
            }
        }

        Ok(report)
    }
}
