use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use automator_core::{
    AuditRepository, AutomatorError, DatabaseConfig, ExecutionRepository, Result,
    TaskDefinitionRepository,
};

use super::sqlite::{
    SqliteAuditRepository, SqliteExecutionRepository, SqliteTaskDefinitionRepository,
};

/// 数据库管理器：连接池、迁移和各存储的创建
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置建立连接池并执行迁移
    ///
    /// 内存数据库只使用一个长期存活的连接，否则每个连接看到的是不同的库。
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        if !config.is_in_memory() {
            if let Some(dir) = connect_options.get_filename().parent() {
                if !dir.as_os_str().is_empty() && !dir.exists() {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        AutomatorError::Configuration(format!(
                            "创建数据库目录 {} 失败: {e}",
                            dir.display()
                        ))
                    })?;
                    debug!("已创建数据库目录: {}", dir.display());
                }
            }
        }

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if config.is_in_memory() {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let pool = pool_options.connect_with(connect_options).await?;
        let manager = Self { pool };
        manager.run_migrations().await?;
        info!("数据库已就绪: {}", config.url);
        Ok(manager)
    }

    /// 使用内存数据库，主要用于测试
    pub async fn in_memory() -> Result<Self> {
        Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_repository(&self) -> Arc<dyn TaskDefinitionRepository> {
        Arc::new(SqliteTaskDefinitionRepository::new(self.pool.clone()))
    }

    pub fn execution_repository(&self) -> Arc<dyn ExecutionRepository> {
        Arc::new(SqliteExecutionRepository::new(self.pool.clone()))
    }

    pub fn audit_repository(&self) -> Arc<dyn AuditRepository> {
        Arc::new(SqliteAuditRepository::new(self.pool.clone()))
    }

    /// 运行数据库迁移
    async fn run_migrations(&self) -> Result<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                action TEXT NOT NULL,
                schedule TEXT NOT NULL DEFAULT '{}',
                timezone TEXT NOT NULL DEFAULT 'UTC',
                scope TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                concurrency_limit INTEGER,
                timeout_seconds INTEGER NOT NULL DEFAULT 3600,
                dry_run INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                last_fired_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                task_id INTEGER NOT NULL,
                task_name TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                tick TEXT NOT NULL,
                target_key TEXT NOT NULL,
                target TEXT NOT NULL,
                action TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                dry_run INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                attempt INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                first_queued_at DATETIME,
                updated_at DATETIME NOT NULL,
                next_attempt_at DATETIME,
                deadline DATETIME NOT NULL,
                completion_token TEXT,
                result TEXT,
                failure TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                task_id INTEGER NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                failure_kind TEXT,
                detail TEXT,
                snapshot TEXT,
                recorded_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_task_definitions_status ON task_definitions(status)",
            "CREATE INDEX IF NOT EXISTS idx_executions_task_id ON executions(task_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
            "CREATE INDEX IF NOT EXISTS idx_executions_next_attempt_at ON executions(next_attempt_at)",
            "CREATE INDEX IF NOT EXISTS idx_executions_deadline ON executions(deadline)",
            "CREATE INDEX IF NOT EXISTS idx_audit_records_execution_id ON audit_records(execution_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_records_task_id ON audit_records(task_id)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }
}
