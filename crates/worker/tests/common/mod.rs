#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Notify;

use automator_core::{
    ActionDescriptor, ActionHandler, ActionOutcome, ActionRequest, AuditRepository,
    CompletionToken, Execution, ExecutionRepository, ExecutionStatus, ResourceDescriptor, Result,
    ScopeKey, TargetScope, TaskDefinition, TaskDefinitionRepository,
};
use automator_dispatcher::{ActionRegistry, ResourceSelector, TaskScheduler};
use automator_infrastructure::{
    InMemoryAuditRepository, InMemoryExecutionRepository, InMemoryTaskDefinitionRepository,
    InventoryResourceLister,
};
use automator_worker::{EngineSettings, ExecutionEngine};

pub const REGION: &str = "eu-west-1";

/// 按固定结果响应的动作，记录调用次数和最大并发
pub struct ScriptedAction {
    descriptor: ActionDescriptor,
    invoke_outcome: ActionOutcome,
    check_outcome: ActionOutcome,
    delay: Option<StdDuration>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    pub invocations: AtomicUsize,
    pub checks: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub seen_execution_ids: Mutex<Vec<String>>,
}

impl ScriptedAction {
    pub fn new(descriptor: ActionDescriptor, invoke_outcome: ActionOutcome) -> Self {
        Self {
            descriptor,
            check_outcome: invoke_outcome.clone(),
            invoke_outcome,
            delay: None,
            gate: None,
            invocations: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen_execution_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_check_outcome(mut self, outcome: ActionOutcome) -> Self {
        self.check_outcome = outcome;
        self
    }

    pub fn with_delay(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 调用开始时通知 `started`，等待 `release` 后才返回
    pub fn with_gate(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((started, release));
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, request: &ActionRequest, outcome: &ActionOutcome) -> ActionOutcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.seen_execution_ids
            .lock()
            .unwrap()
            .push(request.execution_id.clone());

        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.clone()
    }
}

#[async_trait]
impl ActionHandler for ScriptedAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.respond(request, &self.invoke_outcome).await)
    }

    async fn check_completion(
        &self,
        request: &ActionRequest,
        _token: &CompletionToken,
    ) -> Result<ActionOutcome> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.respond(request, &self.check_outcome).await)
    }
}

/// 每个账户在 `REGION` 下有给定数量的实例；`None` 表示该账户查询失败
pub fn inventory(accounts: &[(&str, Option<usize>)]) -> InventoryResourceLister {
    let mut lister = InventoryResourceLister::new();
    for (account, count) in accounts {
        let scope = ScopeKey::new(*account, REGION);
        match count {
            Some(count) => {
                for i in 0..*count {
                    lister = lister.with_resource(
                        scope.clone(),
                        ResourceDescriptor {
                            resource_id: format!("i-{account}-{i}"),
                            resource_type: "Instance".to_string(),
                            tags: BTreeMap::from([("Env".to_string(), "prod".to_string())]),
                        },
                    );
                }
            }
            None => lister = lister.with_unavailable(scope, "AccessDenied"),
        }
    }
    lister
}

pub fn task(name: &str, action: &str, accounts: &[&str]) -> TaskDefinition {
    TaskDefinition::new(
        name,
        action,
        TargetScope::new(
            accounts.iter().map(|a| a.to_string()).collect(),
            vec![REGION.to_string()],
            "Instance",
        ),
    )
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        max_parallel: 16,
        batch_size: 100,
        admission_recheck: Duration::seconds(15),
        max_waiting_per_bucket: 100,
    }
}

pub fn registry(handlers: Vec<Arc<dyn ActionHandler>>) -> Arc<ActionRegistry> {
    let mut builder = ActionRegistry::builder();
    for handler in handlers {
        builder = builder.register(handler).unwrap();
    }
    Arc::new(builder.build())
}

/// 共享内存存储的调度器 + 引擎
pub struct Harness {
    pub tasks: Arc<dyn TaskDefinitionRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub registry: Arc<ActionRegistry>,
    pub scheduler: TaskScheduler,
    pub engine: Arc<ExecutionEngine>,
}

impl Harness {
    pub fn new(handlers: Vec<Arc<dyn ActionHandler>>, lister: InventoryResourceLister) -> Self {
        let tasks: Arc<dyn TaskDefinitionRepository> = Arc::new(InMemoryTaskDefinitionRepository::new());
        let executions: Arc<dyn ExecutionRepository> = Arc::new(InMemoryExecutionRepository::new());
        let audit: Arc<dyn AuditRepository> = Arc::new(InMemoryAuditRepository::new());
        let registry = registry(handlers);
        let scheduler = TaskScheduler::new(
            tasks.clone(),
            executions.clone(),
            audit.clone(),
            registry.clone(),
            ResourceSelector::new(Arc::new(lister), 4),
            Duration::minutes(5),
        );
        let engine = Arc::new(ExecutionEngine::new(
            registry.clone(),
            tasks.clone(),
            executions.clone(),
            audit.clone(),
            settings(),
        ));
        Self {
            tasks,
            executions,
            audit,
            registry,
            scheduler,
            engine,
        }
    }

    /// 模拟进程重启：同一份存储上用新的动作实例构建新的引擎
    pub fn restarted_engine(&self, handlers: Vec<Arc<dyn ActionHandler>>) -> ExecutionEngine {
        ExecutionEngine::new(
            registry(handlers),
            self.tasks.clone(),
            self.executions.clone(),
            self.audit.clone(),
            settings(),
        )
    }

    pub async fn register(&self, task: TaskDefinition) -> TaskDefinition {
        self.tasks.create(&task).await.unwrap()
    }

    pub async fn executions_of(&self, task_id: i64) -> Vec<Execution> {
        self.executions.list_by_task(task_id).await.unwrap()
    }

    pub async fn count_in(&self, task_id: i64, statuses: &[ExecutionStatus]) -> usize {
        self.executions_of(task_id)
            .await
            .iter()
            .filter(|e| statuses.contains(&e.status))
            .count()
    }
}
