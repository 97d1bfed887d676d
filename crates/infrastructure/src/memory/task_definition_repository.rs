use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use automator_core::{
    AutomatorError, Result, TaskDefinition, TaskDefinitionRepository, TaskFilter, TaskStatus,
};

#[derive(Default)]
struct TaskStore {
    next_id: i64,
    tasks: BTreeMap<i64, TaskDefinition>,
}

/// 内存任务定义存储
#[derive(Default)]
pub struct InMemoryTaskDefinitionRepository {
    store: RwLock<TaskStore>,
}

impl InMemoryTaskDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskDefinitionRepository for InMemoryTaskDefinitionRepository {
    async fn create(&self, task: &TaskDefinition) -> Result<TaskDefinition> {
        let mut store = self.store.write().await;
        if store.tasks.values().any(|t| t.name == task.name) {
            return Err(AutomatorError::TaskAlreadyExists {
                name: task.name.clone(),
            });
        }
        store.next_id += 1;
        let mut created = task.clone();
        created.id = store.next_id;
        store.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<TaskDefinition>> {
        Ok(self.store.read().await.tasks.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TaskDefinition>> {
        let store = self.store.read().await;
        Ok(store.tasks.values().find(|t| t.name == name).cloned())
    }

    async fn update(&self, task: &TaskDefinition) -> Result<()> {
        let mut store = self.store.write().await;
        if store
            .tasks
            .values()
            .any(|t| t.name == task.name && t.id != task.id)
        {
            return Err(AutomatorError::TaskAlreadyExists {
                name: task.name.clone(),
            });
        }
        let existing = store
            .tasks
            .get_mut(&task.id)
            .ok_or(AutomatorError::TaskNotFound { id: task.id })?;
        *existing = task.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.store
            .write()
            .await
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(AutomatorError::TaskNotFound { id })
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskDefinition>> {
        let store = self.store.read().await;
        let limit = filter
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(store
            .tasks
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.action.as_ref().map_or(true, |a| &t.action == a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<TaskDefinition>> {
        self.list(&TaskFilter {
            status: Some(TaskStatus::Active),
            ..Default::default()
        })
        .await
    }

    async fn set_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        let mut store = self.store.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or(AutomatorError::TaskNotFound { id })?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_last_fired(&self, id: i64, fired_at: DateTime<Utc>) -> Result<()> {
        let mut store = self.store.write().await;
        let task = store
            .tasks
            .get_mut(&id)
            .ok_or(AutomatorError::TaskNotFound { id })?;
        task.last_fired_at = Some(fired_at);
        Ok(())
    }
}
