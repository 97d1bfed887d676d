//! 资源选择器
//!
//! 把任务的目标范围（账户 × 区域 × 资源类型 × 标签过滤器）解析为具体的资源目标。
//! 各账户/区域的查询相互独立，以有限并行度并发执行；单个范围失败只记录为
//! 部分失败，不影响其他范围。

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use automator_core::{
    ResourceFilter, ResourceLister, ResourceTarget, Result, ScopeKey, ScopeSelection,
    SelectionError, SelectionResult, TagFilterSet, TargetScope,
};
use automator_infrastructure::StructuredLogger;

pub struct ResourceSelector {
    lister: Arc<dyn ResourceLister>,
    parallelism: usize,
}

impl ResourceSelector {
    pub fn new(lister: Arc<dyn ResourceLister>, parallelism: usize) -> Self {
        Self {
            lister,
            parallelism: parallelism.max(1),
        }
    }

    /// 解析目标范围内全部账户/区域的资源
    pub async fn select(&self, scope: &TargetScope) -> Result<SelectionResult> {
        self.select_in(scope, scope.scopes()).await
    }

    /// 只在给定的账户/区域内解析资源
    pub async fn select_in(
        &self,
        scope: &TargetScope,
        scopes: Vec<ScopeKey>,
    ) -> Result<SelectionResult> {
        let mut result = SelectionResult::default();
        let mut selections = Box::pin(self.select_stream(scope, scopes)?);
        while let Some(selection) = selections.next().await {
            result.push(selection);
        }

        for error in &result.errors {
            StructuredLogger::log_selection_partial_failure(&scope.resource_type, error);
        }
        debug!(
            "资源选择完成: 类型={}, 目标={}, 失败范围={}",
            scope.resource_type,
            result.targets.len(),
            result.errors.len()
        );
        Ok(result)
    }

    /// 逐个范围产出查询结果，同时在途的查询不超过并行度上限
    ///
    /// 标签过滤器无效时直接返回错误，不发起任何查询。
    pub fn select_stream<'a>(
        &'a self,
        scope: &'a TargetScope,
        scopes: Vec<ScopeKey>,
    ) -> Result<impl Stream<Item = ScopeSelection> + 'a> {
        let tag_filter = scope
            .tag_filter
            .as_deref()
            .map(TagFilterSet::parse)
            .transpose()?
            .map(Arc::new);
        let filter = ResourceFilter {
            resource_type: scope.resource_type.clone(),
            tag_filter: scope.tag_filter.clone(),
        };

        let stream = stream::iter(scopes)
            .map(move |key| {
                let filter = filter.clone();
                let tag_filter = tag_filter.clone();
                async move {
                    let outcome = match self.lister.list(&key, &filter).await {
                        Ok(resources) => Ok(resources
                            .into_iter()
                            .filter(|r| r.resource_type == filter.resource_type)
                            .filter(|r| {
                                tag_filter
                                    .as_ref()
                                    .map_or(true, |f| f.matches_tags(&r.tags))
                            })
                            .map(|r| ResourceTarget::from_descriptor(&key, r))
                            .collect()),
                        Err(e) => {
                            warn!("查询范围 {} 的资源失败: {}", key, e);
                            Err(SelectionError {
                                scope: key.clone(),
                                message: e.to_string(),
                            })
                        }
                    };
                    ScopeSelection { scope: key, outcome }
                }
            })
            .buffer_unordered(self.parallelism);

        Ok(stream)
    }
}
