use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use automator_core::{
    AutomatorError, ExecutionRepository, Result, TaskDefinition, TaskDefinitionRepository,
    TaskStatus,
};

use crate::action_registry::ActionRegistry;

/// 配置中任务定义的写入结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// 仍有未结束执行实例而未能更新的任务
    pub deferred: Vec<String>,
}

/// 任务定义管理
///
/// 写入前按动作注册表校验；任务存在未结束的执行实例时拒绝修改和删除。
pub struct TaskCatalog {
    task_repo: Arc<dyn TaskDefinitionRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    registry: Arc<ActionRegistry>,
}

impl TaskCatalog {
    pub fn new(
        task_repo: Arc<dyn TaskDefinitionRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            task_repo,
            execution_repo,
            registry,
        }
    }

    pub async fn register(&self, task: &TaskDefinition) -> Result<TaskDefinition> {
        self.registry.validate_task(task)?;
        let created = self.task_repo.create(task).await?;
        info!("任务已注册: {} (ID: {}, 动作: {})", created.name, created.id, created.action);
        Ok(created)
    }

    pub async fn update(&self, task: &TaskDefinition) -> Result<()> {
        self.registry.validate_task(task)?;
        self.ensure_idle(task.id).await?;
        let mut updated = task.clone();
        updated.updated_at = Utc::now();
        self.task_repo.update(&updated).await
    }

    pub async fn delete(&self, task_id: i64) -> Result<()> {
        self.ensure_idle(task_id).await?;
        self.task_repo.delete(task_id).await
    }

    /// 启用或停用任务；停用不影响已在运行的执行实例
    pub async fn set_status(&self, task_id: i64, status: TaskStatus) -> Result<()> {
        self.task_repo.set_status(task_id, status).await?;
        info!("任务 {} 状态已设置为 {}", task_id, status.as_str());
        Ok(())
    }

    async fn ensure_idle(&self, task_id: i64) -> Result<()> {
        if self.execution_repo.count_active_for_task(task_id).await? > 0 {
            return Err(AutomatorError::TaskInFlight { id: task_id });
        }
        Ok(())
    }

    /// 把配置中的任务定义写入存储：不存在则创建，定义有变化则更新
    pub async fn seed(&self, tasks: &[TaskDefinition]) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for task in tasks {
            self.registry.validate_task(task)?;

            let Some(existing) = self.task_repo.get_by_name(&task.name).await? else {
                self.register(task).await?;
                report.created += 1;
                continue;
            };

            if same_definition(&existing, task) {
                report.unchanged += 1;
                continue;
            }

            let mut merged = task.clone();
            merged.id = existing.id;
            merged.last_fired_at = existing.last_fired_at;
            merged.created_at = existing.created_at;
            match self.update(&merged).await {
                Ok(()) => report.updated += 1,
                Err(AutomatorError::TaskInFlight { .. }) => {
                    warn!("任务 {} 仍有未结束的执行实例，本次启动不更新其定义", task.name);
                    report.deferred.push(task.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

fn same_definition(a: &TaskDefinition, b: &TaskDefinition) -> bool {
    a.description == b.description
        && a.action == b.action
        && a.schedule == b.schedule
        && a.scope == b.scope
        && a.parameters == b.parameters
        && a.concurrency_limit == b.concurrency_limit
        && a.timeout_seconds == b.timeout_seconds
        && a.dry_run == b.dry_run
        && a.status == b.status
}
