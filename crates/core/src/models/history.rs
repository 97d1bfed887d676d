use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::{Execution, ExecutionFailure, ExecutionStatus, TriggerSource};

/// 单个目标在一次触发中的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetOutcome {
    pub execution_id: String,
    pub target_key: String,
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub failure: Option<ExecutionFailure>,
    pub result: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// 一次触发（计划时间点或事件）的运行汇总
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRunSummary {
    pub task_id: i64,
    pub tick: String,
    pub source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub outcomes: Vec<TargetOutcome>,
}

impl TaskRunSummary {
    pub fn is_finished(&self) -> bool {
        self.in_progress == 0
    }

    /// 按触发点分组，结果按开始时间从新到旧排列，组内按目标键排序
    pub fn group(executions: Vec<Execution>) -> Vec<TaskRunSummary> {
        let mut by_tick: BTreeMap<(i64, String), TaskRunSummary> = BTreeMap::new();

        for execution in executions {
            let summary = by_tick
                .entry((execution.task_id, execution.tick.clone()))
                .or_insert_with(|| TaskRunSummary {
                    task_id: execution.task_id,
                    tick: execution.tick.clone(),
                    source: execution.source,
                    started_at: execution.created_at,
                    succeeded: 0,
                    failed: 0,
                    in_progress: 0,
                    outcomes: Vec::new(),
                });

            summary.started_at = summary.started_at.min(execution.created_at);
            match execution.status {
                ExecutionStatus::Succeeded => summary.succeeded += 1,
                ExecutionStatus::Failed | ExecutionStatus::TimedOut => summary.failed += 1,
                _ => summary.in_progress += 1,
            }
            summary.outcomes.push(TargetOutcome {
                execution_id: execution.id,
                target_key: execution.target.target_key(),
                status: execution.status,
                attempts: execution.attempt,
                failure: execution.failure,
                result: execution.result,
                updated_at: execution.updated_at,
            });
        }

        let mut summaries: Vec<TaskRunSummary> = by_tick.into_values().collect();
        for summary in &mut summaries {
            summary.outcomes.sort_by(|a, b| a.target_key.cmp(&b.target_key));
        }
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }
}
