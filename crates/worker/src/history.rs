//! 任务运行历史

use automator_core::{ExecutionRepository, Result, TaskRunSummary};

/// 任务的执行实例按触发点分组，最新的在前
pub async fn run_history(
    repository: &dyn ExecutionRepository,
    task_id: i64,
) -> Result<Vec<TaskRunSummary>> {
    let executions = repository.list_by_task(task_id).await?;
    Ok(TaskRunSummary::group(executions))
}
