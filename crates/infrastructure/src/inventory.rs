//! 基于静态清单文件的资源查询实现
//!
//! 清单文件格式：
//!
//! ```toml
//! [[resources]]
//! account = "111111111111"
//! region = "eu-west-1"
//! resource_id = "i-0abc"
//! resource_type = "Instance"
//! tags = { Env = "prod" }
//!
//! # 查询该范围时返回错误，用于演练部分失败
//! [[unavailable]]
//! account = "222222222222"
//! region = "eu-west-1"
//! message = "AccessDenied"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use automator_core::{
    AutomatorError, ResourceDescriptor, ResourceFilter, ResourceLister, Result, ScopeKey,
};

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    resources: Vec<InventoryEntry>,
    #[serde(default)]
    unavailable: Vec<UnavailableScope>,
}

#[derive(Debug, Deserialize)]
struct InventoryEntry {
    account: String,
    region: String,
    resource_id: String,
    resource_type: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct UnavailableScope {
    account: String,
    region: String,
    #[serde(default = "default_unavailable_message")]
    message: String,
}

fn default_unavailable_message() -> String {
    "scope unavailable".to_string()
}

/// 静态清单资源查询
#[derive(Debug, Default, Clone)]
pub struct InventoryResourceLister {
    resources: HashMap<ScopeKey, Vec<ResourceDescriptor>>,
    unavailable: HashMap<ScopeKey, String>,
}

impl InventoryResourceLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: InventoryFile = toml::from_str(content)
            .map_err(|e| AutomatorError::Configuration(format!("解析资源清单失败: {e}")))?;

        let mut lister = Self::new();
        for entry in file.resources {
            lister = lister.with_resource(
                ScopeKey::new(entry.account, entry.region),
                ResourceDescriptor {
                    resource_id: entry.resource_id,
                    resource_type: entry.resource_type,
                    tags: entry.tags,
                },
            );
        }
        for scope in file.unavailable {
            lister = lister.with_unavailable(ScopeKey::new(scope.account, scope.region), scope.message);
        }
        Ok(lister)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomatorError::Configuration(format!("读取资源清单 {} 失败: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_resource(mut self, scope: ScopeKey, descriptor: ResourceDescriptor) -> Self {
        self.resources.entry(scope).or_default().push(descriptor);
        self
    }

    pub fn with_unavailable(mut self, scope: ScopeKey, message: impl Into<String>) -> Self {
        self.unavailable.insert(scope, message.into());
        self
    }

    pub fn resource_count(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ResourceLister for InventoryResourceLister {
    async fn list(&self, scope: &ScopeKey, filter: &ResourceFilter) -> Result<Vec<ResourceDescriptor>> {
        if let Some(message) = self.unavailable.get(scope) {
            return Err(AutomatorError::ResourceListing(format!("{scope}: {message}")));
        }
        let found: Vec<ResourceDescriptor> = self
            .resources
            .get(scope)
            .map(|list| {
                list.iter()
                    .filter(|d| d.resource_type == filter.resource_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!(scope = %scope, resource_type = %filter.resource_type, count = found.len(), "查询资源清单");
        Ok(found)
    }
}
