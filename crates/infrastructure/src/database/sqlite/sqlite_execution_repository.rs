use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use automator_core::{
    AutomatorError, CompletionToken, Execution, ExecutionRepository, ExecutionStatus, Result,
};

use crate::database::mapping::MappingHelpers;

const EXECUTION_COLUMNS: &str = "id, task_id, task_name, dedup_key, tick, target, action, \
    parameters, dry_run, source, status, attempt, max_attempts, created_at, first_queued_at, \
    updated_at, next_attempt_at, deadline, completion_token, result, failure, cancel_requested, version";

const NON_TERMINAL: [ExecutionStatus; 5] = [
    ExecutionStatus::Pending,
    ExecutionStatus::Queued,
    ExecutionStatus::Running,
    ExecutionStatus::WaitingForCompletion,
    ExecutionStatus::Retrying,
];

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &SqliteRow) -> Result<Execution> {
        let source: String = row.try_get("source")?;
        Ok(Execution {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            task_name: row.try_get("task_name")?,
            dedup_key: row.try_get("dedup_key")?,
            tick: row.try_get("tick")?,
            target: MappingHelpers::parse_json(row, "target")?,
            action: row.try_get("action")?,
            parameters: MappingHelpers::parse_json(row, "parameters")?,
            dry_run: row.try_get("dry_run")?,
            source: source.parse()?,
            status: row.try_get("status")?,
            attempt: MappingHelpers::parse_u32(row, "attempt")?,
            max_attempts: MappingHelpers::parse_u32(row, "max_attempts")?,
            created_at: row.try_get("created_at")?,
            first_queued_at: row.try_get("first_queued_at")?,
            updated_at: row.try_get("updated_at")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            deadline: row.try_get("deadline")?,
            completion_token: row
                .try_get::<Option<String>, _>("completion_token")?
                .map(CompletionToken::new),
            result: MappingHelpers::parse_optional_json(row, "result")?,
            failure: MappingHelpers::parse_optional_json(row, "failure")?,
            cancel_requested: row.try_get("cancel_requested")?,
            version: row.try_get("version")?,
        })
    }

    fn status_clause(column: &str, statuses: &[ExecutionStatus]) -> String {
        format!(
            "{column} IN ({})",
            MappingHelpers::placeholders(statuses.len())
        )
    }

    async fn fetch_where(&self, clause: &str, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE {clause} ORDER BY created_at ASC, id ASC");
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, execution), fields(
        execution_id = %execution.id,
        dedup_key = %execution.dedup_key,
    ))]
    async fn create_if_absent(&self, execution: &Execution) -> Result<Option<Execution>> {
        let target_json = MappingHelpers::to_json(&execution.target, "target")?;
        let parameters_json = MappingHelpers::to_json(&execution.parameters, "parameters")?;
        let result_json = MappingHelpers::to_optional_json(execution.result.as_ref(), "result")?;
        let failure_json = MappingHelpers::to_optional_json(execution.failure.as_ref(), "failure")?;

        let result = sqlx::query(
            r#"
            INSERT INTO executions (id, task_id, task_name, dedup_key, tick, target_key, target, action,
                parameters, dry_run, source, status, attempt, max_attempts, created_at, first_queued_at,
                updated_at, next_attempt_at, deadline, completion_token, result, failure,
                cancel_requested, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedup_key) DO NOTHING
            "#,
        )
        .bind(&execution.id)
        .bind(execution.task_id)
        .bind(&execution.task_name)
        .bind(&execution.dedup_key)
        .bind(&execution.tick)
        .bind(execution.target.target_key())
        .bind(target_json)
        .bind(&execution.action)
        .bind(parameters_json)
        .bind(execution.dry_run)
        .bind(execution.source.as_str())
        .bind(execution.status)
        .bind(i64::from(execution.attempt))
        .bind(i64::from(execution.max_attempts))
        .bind(execution.created_at)
        .bind(execution.first_queued_at)
        .bind(execution.updated_at)
        .bind(execution.next_attempt_at)
        .bind(execution.deadline)
        .bind(execution.completion_token.as_ref().map(|t| t.as_str().to_string()))
        .bind(result_json)
        .bind(failure_json)
        .bind(execution.cancel_requested)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("去重键已存在，跳过创建: {}", execution.dedup_key);
            return Ok(None);
        }
        Ok(Some(execution.clone()))
    }

    #[instrument(skip(self), fields(execution_id = %id))]
    async fn get_by_id(&self, id: &str) -> Result<Option<Execution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Execution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE dedup_key = ?");
        let row = sqlx::query(&sql)
            .bind(dedup_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self, execution), fields(
        execution_id = %execution.id,
        status = %execution.status,
        version = execution.version,
    ))]
    async fn update(&self, execution: &Execution) -> Result<Execution> {
        let result_json = MappingHelpers::to_optional_json(execution.result.as_ref(), "result")?;
        let failure_json = MappingHelpers::to_optional_json(execution.failure.as_ref(), "failure")?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, attempt = ?, first_queued_at = ?, updated_at = ?, next_attempt_at = ?,
                completion_token = ?, result = ?, failure = ?, cancel_requested = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(execution.status)
        .bind(i64::from(execution.attempt))
        .bind(execution.first_queued_at)
        .bind(execution.updated_at)
        .bind(execution.next_attempt_at)
        .bind(execution.completion_token.as_ref().map(|t| t.as_str().to_string()))
        .bind(result_json)
        .bind(failure_json)
        .bind(execution.cancel_requested)
        .bind(&execution.id)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM executions WHERE id = ?")
                .bind(&execution.id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                AutomatorError::ConcurrentModification {
                    id: execution.id.clone(),
                    expected_version: execution.version,
                }
            } else {
                AutomatorError::ExecutionNotFound {
                    id: execution.id.clone(),
                }
            });
        }

        let mut updated = execution.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn list_due(
        &self,
        statuses: &[ExecutionStatus],
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE {} \
             AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            Self::status_clause("status", statuses)
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        let rows = query.bind(now).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Execution>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE {} AND deadline <= ? \
             ORDER BY deadline ASC, id ASC LIMIT ?",
            Self::status_clause("status", &NON_TERMINAL)
        );
        let mut query = sqlx::query(&sql);
        for status in NON_TERMINAL {
            query = query.bind(status);
        }
        let rows = query.bind(now).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn list_by_status(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_where(&Self::status_clause("status", statuses), statuses)
            .await
    }

    async fn list_by_task(&self, task_id: i64) -> Result<Vec<Execution>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE task_id = ? ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(task_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn count_active_for_task(&self, task_id: i64) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS active FROM executions WHERE task_id = ? AND {}",
            Self::status_clause("status", &NON_TERMINAL)
        );
        let mut query = sqlx::query(&sql).bind(task_id);
        for status in NON_TERMINAL {
            query = query.bind(status);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("active")?)
    }

    #[instrument(skip(self))]
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        keep_failed: bool,
    ) -> Result<Vec<String>> {
        let statuses: Vec<ExecutionStatus> = if keep_failed {
            vec![ExecutionStatus::Succeeded]
        } else {
            vec![
                ExecutionStatus::Succeeded,
                ExecutionStatus::Failed,
                ExecutionStatus::TimedOut,
            ]
        };
        let clause = Self::status_clause("status", &statuses);

        let mut tx = self.pool.begin().await?;

        let select_sql = format!("SELECT id FROM executions WHERE {clause} AND updated_at < ?");
        let mut select = sqlx::query(&select_sql);
        for status in &statuses {
            select = select.bind(*status);
        }
        let ids = select
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let delete_sql = format!("DELETE FROM executions WHERE {clause} AND updated_at < ?");
        let mut delete = sqlx::query(&delete_sql);
        for status in &statuses {
            delete = delete.bind(*status);
        }
        delete.bind(cutoff).execute(&mut *tx).await?;

        tx.commit().await?;
        debug!("清理终态执行实例 {} 个", ids.len());
        Ok(ids)
    }
}
