use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use automator_core::{AutomatorError, Execution, ExecutionRepository, ExecutionStatus, Result};

#[derive(Default)]
struct ExecutionStore {
    executions: HashMap<String, Execution>,
    by_dedup_key: HashMap<String, String>,
}

impl ExecutionStore {
    fn sorted<'a>(&self, iter: impl Iterator<Item = &'a Execution>) -> Vec<Execution> {
        let mut list: Vec<Execution> = iter.cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }
}

/// 内存执行实例存储
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    store: RwLock<ExecutionStore>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn limit_of(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_if_absent(&self, execution: &Execution) -> Result<Option<Execution>> {
        let mut store = self.store.write().await;
        if store.by_dedup_key.contains_key(&execution.dedup_key) {
            return Ok(None);
        }
        store
            .by_dedup_key
            .insert(execution.dedup_key.clone(), execution.id.clone());
        store
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(Some(execution.clone()))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self.store.read().await.executions.get(id).cloned())
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Execution>> {
        let store = self.store.read().await;
        Ok(store
            .by_dedup_key
            .get(dedup_key)
            .and_then(|id| store.executions.get(id))
            .cloned())
    }

    async fn update(&self, execution: &Execution) -> Result<Execution> {
        let mut store = self.store.write().await;
        let stored = store
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| AutomatorError::ExecutionNotFound {
                id: execution.id.clone(),
            })?;
        if stored.version != execution.version {
            return Err(AutomatorError::ConcurrentModification {
                id: execution.id.clone(),
                expected_version: execution.version,
            });
        }
        let mut updated = execution.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_due(
        &self,
        statuses: &[ExecutionStatus],
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>> {
        let store = self.store.read().await;
        let mut due = store.sorted(
            store
                .executions
                .values()
                .filter(|e| statuses.contains(&e.status) && e.is_due(now)),
        );
        due.truncate(limit_of(limit));
        Ok(due)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Execution>> {
        let store = self.store.read().await;
        let mut expired: Vec<Execution> = store
            .executions
            .values()
            .filter(|e| !e.status.is_terminal() && e.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));
        expired.truncate(limit_of(limit));
        Ok(expired)
    }

    async fn list_by_status(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        let store = self.store.read().await;
        Ok(store.sorted(
            store
                .executions
                .values()
                .filter(|e| statuses.contains(&e.status)),
        ))
    }

    async fn list_by_task(&self, task_id: i64) -> Result<Vec<Execution>> {
        let store = self.store.read().await;
        Ok(store.sorted(store.executions.values().filter(|e| e.task_id == task_id)))
    }

    async fn count_active_for_task(&self, task_id: i64) -> Result<i64> {
        let store = self.store.read().await;
        let count = store
            .executions
            .values()
            .filter(|e| e.task_id == task_id && !e.status.is_terminal())
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        keep_failed: bool,
    ) -> Result<Vec<String>> {
        let mut store = self.store.write().await;
        let purged: Vec<(String, String)> = store
            .executions
            .values()
            .filter(|e| e.updated_at < cutoff)
            .filter(|e| match e.status {
                ExecutionStatus::Succeeded => true,
                ExecutionStatus::Failed | ExecutionStatus::TimedOut => !keep_failed,
                _ => false,
            })
            .map(|e| (e.id.clone(), e.dedup_key.clone()))
            .collect();
        for (id, dedup_key) in &purged {
            store.executions.remove(id);
            store.by_dedup_key.remove(dedup_key);
        }
        Ok(purged.into_iter().map(|(id, _)| id).collect())
    }
}
