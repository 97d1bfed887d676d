use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{ResourceDescriptor, ResourceFilter, ScopeKey};

/// 资源清单查询接口
///
/// 每次调用只查询一个账户/区域；调用失败只影响该范围。
/// 实现可以只在服务端按资源类型过滤，标签过滤由资源选择器在本地完成。
#[async_trait]
pub trait ResourceLister: Send + Sync {
    async fn list(&self, scope: &ScopeKey, filter: &ResourceFilter) -> Result<Vec<ResourceDescriptor>>;
}
