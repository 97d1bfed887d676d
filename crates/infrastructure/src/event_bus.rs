use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use automator_core::{AutomatorError, EventSource, Result, TaskEvent};

/// 事件发布端，可以克隆后交给各个事件生产者
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<TaskEvent>,
}

impl EventPublisher {
    /// 投递事件，队列已满时立即返回错误
    pub fn publish(&self, event: TaskEvent) -> Result<()> {
        debug!(
            event_id = %event.id,
            source = %event.source,
            event_type = %event.event_type,
            "投递事件"
        );
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => {
                AutomatorError::Internal(format!("事件队列已满，丢弃事件 {}", event.id))
            }
            mpsc::error::TrySendError::Closed(event) => {
                AutomatorError::Internal(format!("事件总线已关闭，丢弃事件 {}", event.id))
            }
        })
    }
}

/// 基于 `tokio::sync::mpsc` 的内存事件总线
#[derive(Debug)]
pub struct InMemoryEventBus {
    publisher: EventPublisher,
    receiver: Mutex<mpsc::Receiver<TaskEvent>>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            publisher: EventPublisher { sender },
            receiver: Mutex::new(receiver),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn publish(&self, event: TaskEvent) -> Result<()> {
        self.publisher.publish(event)
    }
}

#[async_trait]
impl EventSource for InMemoryEventBus {
    async fn next_batch(&self, max: usize) -> Result<Vec<TaskEvent>> {
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::new();
        while batch.len() < max {
            match receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}
