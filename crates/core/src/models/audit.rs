use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::{Execution, ExecutionStatus, FailureKind};

/// 审计记录
///
/// 执行实例的每一次状态转换追加一条，进入终态时附带完整快照。
/// 记录只追加，不修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// 由存储分配
    pub id: i64,
    pub execution_id: String,
    pub task_id: i64,
    /// 创建时为空
    pub from_status: Option<ExecutionStatus>,
    pub to_status: ExecutionStatus,
    pub attempt: u32,
    pub failure_kind: Option<FailureKind>,
    pub detail: Option<String>,
    pub snapshot: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// 根据执行实例的当前状态生成一条转换记录
    pub fn for_transition(
        execution: &Execution,
        from: Option<ExecutionStatus>,
        detail: Option<String>,
    ) -> Self {
        let snapshot = if execution.status.is_terminal() {
            serde_json::to_value(execution).ok()
        } else {
            None
        };
        let failure_kind = execution
            .failure
            .as_ref()
            .filter(|_| execution.status.is_terminal() || execution.status == ExecutionStatus::Retrying)
            .map(|f| f.kind);

        Self {
            id: 0,
            execution_id: execution.id.clone(),
            task_id: execution.task_id,
            from_status: from,
            to_status: execution.status,
            attempt: execution.attempt,
            failure_kind,
            detail,
            snapshot,
            recorded_at: execution.updated_at,
        }
    }
}

/// 审计记录查询条件
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub execution_id: Option<String>,
    pub task_id: Option<i64>,
    pub limit: Option<i64>,
}
