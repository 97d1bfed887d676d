//! Structured logging utilities
//!
//! Event-named log records for the execution lifecycle. Every record carries an
//! `event` field so log pipelines can filter on it.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use automator_core::{AutomatorError, Execution, ExecutionStatus, SelectionError};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log execution creation
    pub fn log_execution_created(execution: &Execution) {
        info!(
            event = "execution_created",
            execution.id = %execution.id,
            task.id = execution.task_id,
            task.name = %execution.task_name,
            action = %execution.action,
            resource.target = %execution.target.target_key(),
            tick = %execution.tick,
            source = execution.source.as_str(),
            "Execution created"
        );
    }

    /// Log a state transition
    pub fn log_execution_transition(execution: &Execution, from: ExecutionStatus) {
        let failure = execution
            .failure
            .as_ref()
            .map(|f| format!("{}: {}", f.code, f.message));
        match execution.status {
            ExecutionStatus::Failed | ExecutionStatus::TimedOut => warn!(
                event = "execution_transition",
                execution.id = %execution.id,
                task.name = %execution.task_name,
                action = %execution.action,
                resource.target = %execution.target.target_key(),
                from = from.as_str(),
                to = execution.status.as_str(),
                attempt = execution.attempt,
                failure.kind = execution.failure.as_ref().map(|f| f.kind.as_str()),
                failure = failure.as_deref(),
                "Execution finished unsuccessfully"
            ),
            _ => debug!(
                event = "execution_transition",
                execution.id = %execution.id,
                task.name = %execution.task_name,
                action = %execution.action,
                resource.target = %execution.target.target_key(),
                from = from.as_str(),
                to = execution.status.as_str(),
                attempt = execution.attempt,
                "Execution state changed"
            ),
        }
    }

    /// Log a scheduled retry
    pub fn log_execution_retry(execution: &Execution, delay: Duration, reason: &str) {
        warn!(
            event = "execution_retry",
            execution.id = %execution.id,
            task.name = %execution.task_name,
            action = %execution.action,
            attempt = execution.attempt,
            max_attempts = execution.max_attempts,
            retry.delay_ms = delay.as_millis() as u64,
            retry.reason = reason,
            "Execution retry scheduled"
        );
    }

    /// Log admission deferral
    pub fn log_admission_deferred(execution: &Execution, bucket: &str, position: usize) {
        debug!(
            event = "admission_deferred",
            execution.id = %execution.id,
            action = %execution.action,
            bucket = bucket,
            queue.position = position,
            "Execution deferred by admission control"
        );
    }

    /// Log a scope that could not be listed
    pub fn log_selection_partial_failure(resource_type: &str, error: &SelectionError) {
        warn!(
            event = "selection_partial_failure",
            resource_type = resource_type,
            scope = %error.scope,
            error.message = %error.message,
            "Resource selection failed for scope"
        );
    }

    /// Log a task that could not be evaluated in this cycle
    pub fn log_task_evaluation_failed(task_id: i64, task_name: &str, error: &AutomatorError) {
        error!(
            event = "task_evaluation_failed",
            task.id = task_id,
            task.name = task_name,
            error.permanent = error.is_permanent(),
            error.message = %error,
            "Task evaluation failed"
        );
    }

    /// Log retention cleanup
    pub fn log_cleanup(executions_purged: usize, audit_records_purged: u64, duration_ms: u64) {
        info!(
            event = "retention_cleanup",
            cleanup.executions = executions_purged,
            cleanup.audit_records = audit_records_purged,
            cleanup.duration_ms = duration_ms,
            "Retention cleanup completed"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
