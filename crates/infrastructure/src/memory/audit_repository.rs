use async_trait::async_trait;
use tokio::sync::RwLock;

use automator_core::{AuditFilter, AuditRecord, AuditRepository, Result};

#[derive(Default)]
struct AuditStore {
    next_id: i64,
    records: Vec<AuditRecord>,
}

/// 内存审计记录存储，只追加
#[derive(Default)]
pub struct InMemoryAuditRepository {
    store: RwLock<AuditStore>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, record: &AuditRecord) -> Result<AuditRecord> {
        let mut store = self.store.write().await;
        store.next_id += 1;
        let mut appended = record.clone();
        appended.id = store.next_id;
        store.records.push(appended.clone());
        Ok(appended)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let store = self.store.read().await;
        let limit = filter
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(store
            .records
            .iter()
            .filter(|r| {
                filter
                    .execution_id
                    .as_ref()
                    .map_or(true, |id| &r.execution_id == id)
            })
            .filter(|r| filter.task_id.map_or(true, |id| r.task_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_for_executions(&self, execution_ids: &[String]) -> Result<u64> {
        let mut store = self.store.write().await;
        let before = store.records.len();
        store
            .records
            .retain(|r| !execution_ids.contains(&r.execution_id));
        Ok(u64::try_from(before - store.records.len()).unwrap_or(u64::MAX))
    }
}
