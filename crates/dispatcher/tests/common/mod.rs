#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use automator_core::{
    ActionDescriptor, ActionHandler, ActionOutcome, ActionRequest, AuditRepository,
    CompletionToken, ExecutionRepository, ResourceDescriptor, Result, ScopeKey, TargetScope,
    TaskDefinition, TaskDefinitionRepository,
};
use automator_dispatcher::ActionRegistry;
use automator_infrastructure::{
    InMemoryAuditRepository, InMemoryExecutionRepository, InMemoryTaskDefinitionRepository,
    InventoryResourceLister,
};

pub const REGION: &str = "eu-west-1";

/// 立即成功的动作
pub struct StaticAction(pub ActionDescriptor);

#[async_trait]
impl ActionHandler for StaticAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.0
    }

    async fn invoke(&self, _request: &ActionRequest) -> Result<ActionOutcome> {
        Ok(ActionOutcome::Done(json!({})))
    }

    async fn check_completion(
        &self,
        _request: &ActionRequest,
        _token: &CompletionToken,
    ) -> Result<ActionOutcome> {
        Ok(ActionOutcome::Done(json!({})))
    }
}

pub fn registry(descriptors: Vec<ActionDescriptor>) -> Arc<ActionRegistry> {
    let mut builder = ActionRegistry::builder();
    for descriptor in descriptors {
        builder = builder.register(Arc::new(StaticAction(descriptor))).unwrap();
    }
    Arc::new(builder.build())
}

pub fn instance(id: &str, tags: &[(&str, &str)]) -> ResourceDescriptor {
    ResourceDescriptor {
        resource_id: id.to_string(),
        resource_type: "Instance".to_string(),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
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
                    lister = lister.with_resource(scope.clone(), instance(&format!("i-{account}-{i}"), &[]));
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

pub struct Stores {
    pub tasks: Arc<dyn TaskDefinitionRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskDefinitionRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            audit: Arc::new(InMemoryAuditRepository::new()),
        }
    }
}
