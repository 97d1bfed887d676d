//! 存储层接口定义
//!
//! - `TaskDefinitionRepository` - 任务定义的增删改查
//! - `ExecutionRepository` - 执行实例，按去重键幂等创建，按版本号条件更新
//! - `AuditRepository` - 状态转换审计记录，只追加
//!
//! 所有接口都是异步的，实现必须是 `Send + Sync`，以 `Arc<dyn Trait>` 的形式共享。
//! 提供 SQLite 实现和内存实现（测试及嵌入式使用），两者语义一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::{
    AuditFilter, AuditRecord, Execution, ExecutionStatus, TaskDefinition, TaskFilter, TaskStatus,
};

/// 任务定义存储
#[async_trait]
pub trait TaskDefinitionRepository: Send + Sync {
    /// 创建任务定义，名称重复时返回 `TaskAlreadyExists`
    async fn create(&self, task: &TaskDefinition) -> Result<TaskDefinition>;

    async fn get_by_id(&self, id: i64) -> Result<Option<TaskDefinition>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<TaskDefinition>>;

    /// 更新任务定义，不存在时返回 `TaskNotFound`
    async fn update(&self, task: &TaskDefinition) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskDefinition>>;

    async fn list_active(&self) -> Result<Vec<TaskDefinition>>;

    async fn set_status(&self, id: i64, status: TaskStatus) -> Result<()>;

    /// 记录最近一次按计划触发的时间点
    async fn set_last_fired(&self, id: i64, fired_at: DateTime<Utc>) -> Result<()>;
}

/// 执行实例存储
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 按去重键幂等创建；已存在时返回 `None`
    async fn create_if_absent(&self, execution: &Execution) -> Result<Option<Execution>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Execution>>;

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Execution>>;

    /// 条件更新：仅当存储中的版本等于 `execution.version` 时写入，
    /// 成功后返回版本号加一的实例，否则返回 `ConcurrentModification`
    async fn update(&self, execution: &Execution) -> Result<Execution>;

    /// 指定状态中到期（`next_attempt_at` 为空或不晚于 `now`）的实例，按创建时间排序
    async fn list_due(
        &self,
        statuses: &[ExecutionStatus],
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>>;

    /// 超过截止时间的非终态实例
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Execution>>;

    async fn list_by_status(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>>;

    async fn list_by_task(&self, task_id: i64) -> Result<Vec<Execution>>;

    /// 任务的非终态实例数量
    async fn count_active_for_task(&self, task_id: i64) -> Result<i64>;

    /// 删除更新时间早于 `cutoff` 的终态实例，返回被删除的ID
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        keep_failed: bool,
    ) -> Result<Vec<String>>;
}

/// 审计记录存储
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<AuditRecord>;

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;

    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<AuditRecord>> {
        self.query(&AuditFilter {
            execution_id: Some(execution_id.to_string()),
            ..Default::default()
        })
        .await
    }

    /// 删除指定执行实例的全部审计记录
    async fn purge_for_executions(&self, execution_ids: &[String]) -> Result<u64>;
}
