use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use automator_core::{AppConfig, EventSource, ResourceLister};
use automator_dispatcher::{ActionRegistry, ResourceSelector, SeedReport, TaskCatalog, TaskScheduler};
use automator_infrastructure::{
    CleanupService, DatabaseManager, EventPublisher, InMemoryEventBus, InventoryResourceLister,
};
use automator_worker::{actions, EngineSettings, ExecutionEngine};

/// 主应用程序
///
/// 持有存储、动作注册表、调度器、执行引擎和事件总线；`run` 启动各循环，
/// 收到关闭信号后依次停止。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    registry: Arc<ActionRegistry>,
    catalog: TaskCatalog,
    scheduler: Arc<TaskScheduler>,
    engine: Arc<ExecutionEngine>,
    event_bus: Arc<InMemoryEventBus>,
}

impl Application {
    /// 创建新的应用实例并写入配置中的任务定义
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        let task_repo = database.task_repository();
        let execution_repo = database.execution_repository();
        let audit_repo = database.audit_repository();

        let registry = Arc::new(
            actions::register_builtin(ActionRegistry::builder())
                .context("注册内置动作失败")?
                .build(),
        );

        let lister = create_resource_lister(&config)?;
        let selector = ResourceSelector::new(lister, config.scheduler.selection_parallelism);
        let scheduler = Arc::new(TaskScheduler::new(
            task_repo.clone(),
            execution_repo.clone(),
            audit_repo.clone(),
            registry.clone(),
            selector,
            Duration::seconds(config.scheduler.catch_up_grace_seconds as i64),
        ));

        let engine = Arc::new(ExecutionEngine::new(
            registry.clone(),
            task_repo.clone(),
            execution_repo.clone(),
            audit_repo,
            EngineSettings::from(&config.engine),
        ));

        let catalog = TaskCatalog::new(task_repo, execution_repo, registry.clone());
        let event_bus = Arc::new(InMemoryEventBus::new(config.scheduler.event_channel_capacity));

        let app = Self {
            config,
            database,
            registry,
            catalog,
            scheduler,
            engine,
            event_bus,
        };
        app.seed_tasks().await?;
        Ok(app)
    }

    async fn seed_tasks(&self) -> Result<SeedReport> {
        let report = self
            .catalog
            .seed(&self.config.tasks)
            .await
            .context("写入配置中的任务定义失败")?;
        info!(
            "任务定义已同步: 新建 {}, 更新 {}, 未变化 {}, 推迟 {}",
            report.created,
            report.updated,
            report.unchanged,
            report.deferred.len()
        );
        Ok(report)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    /// 事件投递端，交给外部事件生产者
    pub fn event_publisher(&self) -> EventPublisher {
        self.event_bus.publisher()
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "启动应用程序: {} 个动作, {} 个配置任务",
            self.registry.len(),
            self.config.tasks.len()
        );

        let mut handles = Vec::new();

        if self.config.scheduler.enabled {
            let scheduler = Arc::clone(&self.scheduler);
            let interval = StdDuration::from_secs(self.config.scheduler.evaluation_interval_seconds);
            let scheduler_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                run_scheduler_loop(scheduler, interval, scheduler_rx).await;
            }));

            let scheduler = Arc::clone(&self.scheduler);
            let source: Arc<dyn EventSource> = self.event_bus.clone();
            let batch = self.config.scheduler.event_batch_size;
            let event_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                run_event_loop(scheduler, source, batch, event_rx).await;
            }));
        } else {
            warn!("调度器已禁用，不会创建新的执行实例");
        }

        if self.config.engine.enabled {
            let engine = Arc::clone(&self.engine);
            let interval = StdDuration::from_secs(self.config.engine.cycle_interval_seconds);
            let engine_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                engine.run(interval, engine_rx).await;
            }));
        } else {
            warn!("执行引擎已禁用，执行实例将停留在当前状态");
        }

        let mut cleanup = CleanupService::new(
            self.database.execution_repository(),
            self.database.audit_repository(),
            self.config.retention.clone(),
        );
        cleanup.start().await.context("启动清理服务失败")?;

        let _ = shutdown_rx.recv().await;
        info!("应用程序收到关闭信号");

        if let Err(e) = cleanup.stop().await {
            warn!("停止清理服务失败: {}", e);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        self.database.close().await;
        info!("所有组件已停止");
        Ok(())
    }
}

fn create_resource_lister(config: &AppConfig) -> Result<Arc<dyn ResourceLister>> {
    let lister = match &config.inventory.path {
        Some(path) => {
            let lister = InventoryResourceLister::load(path)
                .with_context(|| format!("加载资源清单失败: {path}"))?;
            info!("资源清单已加载: {} ({} 个资源)", path, lister.resource_count());
            lister
        }
        None => {
            warn!("未配置资源清单，所有范围都将解析为空");
            InventoryResourceLister::new()
        }
    };
    Ok(Arc::new(lister))
}

/// 运行调度器循环
async fn run_scheduler_loop(
    scheduler: Arc<TaskScheduler>,
    interval: StdDuration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = scheduler.evaluate(Utc::now()).await {
                    error!("任务调度失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("调度器循环收到关闭信号");
                break;
            }
        }
    }
}

/// 运行事件循环，逐批取出事件交给调度器
async fn run_event_loop(
    scheduler: Arc<TaskScheduler>,
    source: Arc<dyn EventSource>,
    batch_size: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(StdDuration::from_millis(500));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = match source.next_batch(batch_size).await {
                    Ok(events) => events,
                    Err(e) => {
                        error!("读取事件失败: {}", e);
                        continue;
                    }
                };
                for event in events {
                    match scheduler.handle_event(&event, Utc::now()).await {
                        Ok(report) => debug!(
                            "事件 {} 处理完成: 触发任务 {}, 新建执行实例 {}",
                            event.id,
                            report.fired_tasks,
                            report.created.len()
                        ),
                        Err(e) => error!("处理事件 {} 失败: {}", event.id, e),
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("事件循环收到关闭信号");
                break;
            }
        }
    }
}
