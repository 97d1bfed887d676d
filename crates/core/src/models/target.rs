use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 账户/区域范围，资源查询和并发控制的基本单位
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub account: String,
    pub region: String,
}

impl ScopeKey {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// 资源查询接口返回的资源描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub resource_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// 资源查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFilter {
    pub resource_type: String,
    pub tag_filter: Option<String>,
}

/// 一次调度周期内解析出的目标资源
///
/// 只随它产生的执行实例一起持久化，不单独存储。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub account: String,
    pub region: String,
    pub resource_type: String,
    pub resource_id: String,
    /// 选择时的标签快照
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ResourceTarget {
    pub fn from_descriptor(scope: &ScopeKey, descriptor: ResourceDescriptor) -> Self {
        Self {
            account: scope.account.clone(),
            region: scope.region.clone(),
            resource_type: descriptor.resource_type,
            resource_id: descriptor.resource_id,
            tags: descriptor.tags,
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::new(self.account.clone(), self.region.clone())
    }

    /// 目标唯一键，参与执行实例去重
    pub fn target_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.account, self.region, self.resource_type, self.resource_id
        )
    }
}

/// 单个范围的资源查询失败（部分失败，不影响其他范围）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionError {
    pub scope: ScopeKey,
    pub message: String,
}

/// 单个范围的查询结果
#[derive(Debug, Clone)]
pub struct ScopeSelection {
    pub scope: ScopeKey,
    pub outcome: std::result::Result<Vec<ResourceTarget>, SelectionError>,
}

/// 资源选择的汇总结果：成功解析的目标加上各范围的错误
#[derive(Debug, Clone, Default)]
pub struct SelectionResult {
    pub targets: Vec<ResourceTarget>,
    pub errors: Vec<SelectionError>,
}

impl SelectionResult {
    pub fn push(&mut self, selection: ScopeSelection) {
        match selection.outcome {
            Ok(mut targets) => self.targets.append(&mut targets),
            Err(error) => self.errors.push(error),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}
