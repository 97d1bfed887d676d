use async_trait::async_trait;

use crate::errors::Result;
use crate::models::TaskEvent;

/// 外部事件源
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 取出最多 `max` 个已到达的事件，不等待
    async fn next_batch(&self, max: usize) -> Result<Vec<TaskEvent>>;
}
