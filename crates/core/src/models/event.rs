use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 外部事件
///
/// 由事件源投递，任务的事件触发器按 `source` + `event_type` 匹配。
/// `account`/`region` 存在时只在对应范围内解析目标。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub id: String,
    pub source: String,
    pub event_type: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            account: None,
            region: None,
            resource_id: None,
            detail: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn in_scope(mut self, account: impl Into<String>, region: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self.region = Some(region.into());
        self
    }

    pub fn for_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}
