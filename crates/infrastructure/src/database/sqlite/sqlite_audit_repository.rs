use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use automator_core::{AuditFilter, AuditRecord, AuditRepository, ExecutionStatus, FailureKind, Result};

use crate::database::mapping::MappingHelpers;

const AUDIT_COLUMNS: &str = "id, execution_id, task_id, from_status, to_status, attempt, \
    failure_kind, detail, snapshot, recorded_at";

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> Result<AuditRecord> {
        let failure_kind = row
            .try_get::<Option<String>, _>("failure_kind")?
            .map(|kind| kind.parse::<FailureKind>())
            .transpose()?;
        Ok(AuditRecord {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            task_id: row.try_get("task_id")?,
            from_status: row.try_get::<Option<ExecutionStatus>, _>("from_status")?,
            to_status: row.try_get("to_status")?,
            attempt: MappingHelpers::parse_u32(row, "attempt")?,
            failure_kind,
            detail: row.try_get("detail")?,
            snapshot: MappingHelpers::parse_optional_json(row, "snapshot")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    #[instrument(skip(self, record), fields(
        execution_id = %record.execution_id,
        to_status = %record.to_status,
    ))]
    async fn append(&self, record: &AuditRecord) -> Result<AuditRecord> {
        let snapshot_json = MappingHelpers::to_optional_json(record.snapshot.as_ref(), "snapshot")?;
        let result = sqlx::query(
            r#"
            INSERT INTO audit_records (execution_id, task_id, from_status, to_status, attempt,
                failure_kind, detail, snapshot, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.execution_id)
        .bind(record.task_id)
        .bind(record.from_status)
        .bind(record.to_status)
        .bind(i64::from(record.attempt))
        .bind(record.failure_kind.map(|kind| kind.as_str()))
        .bind(&record.detail)
        .bind(snapshot_json)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        let mut appended = record.clone();
        appended.id = result.last_insert_rowid();
        Ok(appended)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let mut sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_records WHERE 1=1");
        if filter.execution_id.is_some() {
            sql.push_str(" AND execution_id = ?");
        }
        if filter.task_id.is_some() {
            sql.push_str(" AND task_id = ?");
        }
        sql.push_str(" ORDER BY id ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(execution_id) = &filter.execution_id {
            query = query.bind(execution_id);
        }
        if let Some(task_id) = filter.task_id {
            query = query.bind(task_id);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn purge_for_executions(&self, execution_ids: &[String]) -> Result<u64> {
        if execution_ids.is_empty() {
            return Ok(0);
        }
        let mut purged = 0;
        // SQLite 对绑定参数数量有上限
        for chunk in execution_ids.chunks(500) {
            let sql = format!(
                "DELETE FROM audit_records WHERE execution_id IN ({})",
                MappingHelpers::placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            purged += query.execute(&self.pool).await?.rows_affected();
        }
        Ok(purged)
    }
}
