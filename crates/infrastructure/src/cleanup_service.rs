use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::interval;
use tracing::{error, info, warn};

use automator_core::{AuditRepository, ExecutionRepository, Result, RetentionConfig};

use crate::observability::StructuredLogger;

/// 执行记录清理服务
///
/// 周期性删除超过保留期的终态执行实例及其审计记录，防止数据库无限增长。
pub struct CleanupService {
    execution_repository: Arc<dyn ExecutionRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    config: RetentionConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CleanupService {
    pub fn new(
        execution_repository: Arc<dyn ExecutionRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            execution_repository,
            audit_repository,
            config,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    /// 启动清理服务
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.enabled {
            info!("Cleanup service is disabled");
            return Ok(());
        }

        info!("Starting cleanup service with config: {:?}", self.config);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let execution_repository = self.execution_repository.clone();
        let audit_repository = self.audit_repository.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut cleanup_interval =
                interval(std::time::Duration::from_secs(config.cleanup_interval_seconds));

            loop {
                tokio::select! {
                    _ = cleanup_interval.tick() => {
                        if let Err(e) = Self::perform_cleanup(
                            &execution_repository,
                            &audit_repository,
                            &config,
                            Utc::now(),
                        ).await {
                            error!("Cleanup failed: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Cleanup service shutdown requested");
                        break;
                    }
                }
            }
        });

        self.cleanup_handle = Some(handle);
        info!("Cleanup service started successfully");
        Ok(())
    }

    /// 停止清理服务
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for cleanup service to stop: {}", e);
            }
        }

        info!("Cleanup service stopped");
        Ok(())
    }

    /// 立即执行一次清理
    pub async fn cleanup_once(&self) -> Result<CleanupStats> {
        self.cleanup_at(Utc::now()).await
    }

    /// 以指定时间为基准执行一次清理
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupStats> {
        if !self.config.enabled {
            return Ok(CleanupStats::default());
        }
        Self::perform_cleanup(
            &self.execution_repository,
            &self.audit_repository,
            &self.config,
            now,
        )
        .await
    }

    async fn perform_cleanup(
        execution_repository: &Arc<dyn ExecutionRepository>,
        audit_repository: &Arc<dyn AuditRepository>,
        config: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<CleanupStats> {
        let start_time = std::time::Instant::now();
        let retention = Duration::try_hours(i64::try_from(config.retention_hours).unwrap_or(i64::MAX))
            .unwrap_or(Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged_ids = execution_repository
            .purge_terminal_before(cutoff, config.keep_failed)
            .await?;
        let audit_records_purged = audit_repository.purge_for_executions(&purged_ids).await?;

        let stats = CleanupStats {
            executions_purged: purged_ids.len(),
            audit_records_purged,
            duration: start_time.elapsed(),
        };
        StructuredLogger::log_cleanup(
            stats.executions_purged,
            stats.audit_records_purged,
            u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX),
        );
        Ok(stats)
    }
}

/// 清理统计信息
#[derive(Debug, Default)]
pub struct CleanupStats {
    pub executions_purged: usize,
    pub audit_records_purged: u64,
    pub duration: std::time::Duration,
}

impl CleanupStats {
    pub fn has_cleanup(&self) -> bool {
        self.executions_purged > 0
    }
}
