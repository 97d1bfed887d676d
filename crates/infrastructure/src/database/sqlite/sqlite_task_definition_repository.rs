use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use automator_core::{
    AutomatorError, Result, TaskDefinition, TaskDefinitionRepository, TaskFilter, TaskStatus,
};

use crate::database::mapping::MappingHelpers;

const TASK_COLUMNS: &str = "id, name, description, action, schedule, timezone, scope, parameters, \
    concurrency_limit, timeout_seconds, dry_run, status, last_fired_at, created_at, updated_at";

pub struct SqliteTaskDefinitionRepository {
    pool: SqlitePool,
}

impl SqliteTaskDefinitionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> Result<TaskDefinition> {
        let concurrency_limit = row
            .try_get::<Option<i64>, _>("concurrency_limit")?
            .map(|limit| {
                u32::try_from(limit).map_err(|_| {
                    AutomatorError::Serialization(format!("并发上限超出范围: {limit}"))
                })
            })
            .transpose()?;

        Ok(TaskDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            action: row.try_get("action")?,
            schedule: MappingHelpers::parse_json(row, "schedule")?,
            timezone: row.try_get("timezone")?,
            scope: MappingHelpers::parse_json(row, "scope")?,
            parameters: MappingHelpers::parse_json(row, "parameters")?,
            concurrency_limit,
            timeout_seconds: MappingHelpers::parse_u64(row, "timeout_seconds")?,
            dry_run: row.try_get("dry_run")?,
            status: row.try_get("status")?,
            last_fired_at: row.try_get("last_fired_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn map_unique_violation(error: sqlx::Error, name: &str) -> AutomatorError {
        match error {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AutomatorError::TaskAlreadyExists {
                    name: name.to_string(),
                }
            }
            other => AutomatorError::Database(other),
        }
    }
}

#[async_trait]
impl TaskDefinitionRepository for SqliteTaskDefinitionRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name, action = %task.action))]
    async fn create(&self, task: &TaskDefinition) -> Result<TaskDefinition> {
        let schedule_json = MappingHelpers::to_json(&task.schedule, "schedule")?;
        let scope_json = MappingHelpers::to_json(&task.scope, "scope")?;
        let parameters_json = MappingHelpers::to_json(&task.parameters, "parameters")?;

        let sql = format!(
            r#"
            INSERT INTO task_definitions (name, description, action, schedule, timezone, scope, parameters,
                concurrency_limit, timeout_seconds, dry_run, status, last_fired_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&task.name)
            .bind(&task.description)
            .bind(&task.action)
            .bind(schedule_json)
            .bind(&task.timezone)
            .bind(scope_json)
            .bind(parameters_json)
            .bind(task.concurrency_limit.map(i64::from))
            .bind(MappingHelpers::to_i64(task.timeout_seconds))
            .bind(task.dry_run)
            .bind(task.status)
            .bind(task.last_fired_at)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_unique_violation(e, &task.name))?;

        let created = Self::row_to_task(&row)?;
        debug!("创建任务定义成功: ID {}, 名称: {}", created.id, created.name);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<TaskDefinition>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task_definitions WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self), fields(task_name = %name))]
    async fn get_by_name(&self, name: &str) -> Result<Option<TaskDefinition>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task_definitions WHERE name = ?");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    async fn update(&self, task: &TaskDefinition) -> Result<()> {
        let schedule_json = MappingHelpers::to_json(&task.schedule, "schedule")?;
        let scope_json = MappingHelpers::to_json(&task.scope, "scope")?;
        let parameters_json = MappingHelpers::to_json(&task.parameters, "parameters")?;

        let result = sqlx::query(
            r#"
            UPDATE task_definitions
            SET name = ?, description = ?, action = ?, schedule = ?, timezone = ?, scope = ?, parameters = ?,
                concurrency_limit = ?, timeout_seconds = ?, dry_run = ?, status = ?,
                last_fired_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.action)
        .bind(schedule_json)
        .bind(&task.timezone)
        .bind(scope_json)
        .bind(parameters_json)
        .bind(task.concurrency_limit.map(i64::from))
        .bind(MappingHelpers::to_i64(task.timeout_seconds))
        .bind(task.dry_run)
        .bind(task.status)
        .bind(task.last_fired_at)
        .bind(Utc::now())
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, &task.name))?;

        if result.rows_affected() == 0 {
            return Err(AutomatorError::TaskNotFound { id: task.id });
        }
        debug!("更新任务定义成功: ID {}", task.id);
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM task_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AutomatorError::TaskNotFound { id });
        }
        debug!("删除任务定义成功: ID {}", id);
        Ok(())
    }

    #[instrument(skip(self, filter), fields(status = ?filter.status, action = ?filter.action))]
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskDefinition>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM task_definitions WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        sql.push_str(" ORDER BY id ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(action) = &filter.action {
            query = query.bind(action);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let tasks = rows.iter().map(Self::row_to_task).collect::<Result<Vec<_>>>()?;
        debug!("查询任务定义列表成功，返回 {} 个任务", tasks.len());
        Ok(tasks)
    }

    async fn list_active(&self) -> Result<Vec<TaskDefinition>> {
        self.list(&TaskFilter {
            status: Some(TaskStatus::Active),
            ..Default::default()
        })
        .await
    }

    #[instrument(skip(self), fields(task_id = %id, status = ?status))]
    async fn set_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE task_definitions SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AutomatorError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn set_last_fired(&self, id: i64, fired_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE task_definitions SET last_fired_at = ? WHERE id = ?")
            .bind(fired_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AutomatorError::TaskNotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use automator_core::{EventTrigger, TargetScope};
    use serde_json::json;

    fn task(name: &str) -> TaskDefinition {
        TaskDefinition::new(
            name,
            "noop-tag-report",
            TargetScope::new(vec!["111111111111".into()], vec!["eu-west-1".into()], "Instance"),
        )
        .with_cron("*/5 * * * *")
        .with_event(EventTrigger::new("inventory", "InstanceLaunched"))
        .with_parameter("tag_key", json!("Owner"))
        .with_tag_filter("Env=prod")
        .with_concurrency_limit(3)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTaskDefinitionRepository::new(db.pool().clone());

        let created = repo.create(&task("tag-report")).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.schedule.events.len(), 1);
        assert_eq!(created.scope.tag_filter.as_deref(), Some("Env=prod"));
        assert_eq!(created.concurrency_limit, Some(3));
        assert_eq!(created.timezone, "UTC");
        assert_eq!(created.parameters.get("tag_key"), Some(&json!("Owner")));

        let by_name = repo.get_by_name("tag-report").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(repo.get_by_id(created.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTaskDefinitionRepository::new(db.pool().clone());

        repo.create(&task("dup")).await.unwrap();
        let err = repo.create(&task("dup")).await.unwrap_err();
        assert!(matches!(err, AutomatorError::TaskAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_status_and_last_fired() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTaskDefinitionRepository::new(db.pool().clone());
        let created = repo.create(&task("t")).await.unwrap();

        repo.set_status(created.id, TaskStatus::Inactive).await.unwrap();
        assert!(repo.list_active().await.unwrap().is_empty());

        let fired_at = Utc::now();
        repo.set_last_fired(created.id, fired_at).await.unwrap();
        let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_fired_at, Some(fired_at));

        let mut changed = loaded.clone();
        changed.timeout_seconds = 60;
        changed.timezone = "Europe/Berlin".into();
        repo.update(&changed).await.unwrap();
        let reloaded = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.timeout_seconds, 60);
        assert_eq!(reloaded.timezone, "Europe/Berlin");

        repo.delete(created.id).await.unwrap();
        assert!(matches!(
            repo.delete(created.id).await,
            Err(AutomatorError::TaskNotFound { .. })
        ));
        assert!(matches!(
            repo.set_status(created.id, TaskStatus::Active).await,
            Err(AutomatorError::TaskNotFound { .. })
        ));
    }
}
