use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use automator_core::{
    ActionDescriptor, ActionHandler, ActionOutcome, ActionRequest, CompletionToken,
    ConcurrencyScope, ParameterKind, ParameterSpec, ParameterValue, Result,
};

pub const TAG_REPORT_ACTION: &str = "noop-tag-report";

/// 报告目标资源的标签，不修改任何资源
pub struct TagReportAction {
    descriptor: ActionDescriptor,
}

impl TagReportAction {
    pub fn new() -> Self {
        let descriptor = ActionDescriptor::new(TAG_REPORT_ACTION)
            .with_parameter(
                ParameterSpec::new("tag_key", ParameterKind::String)
                    .with_default(ParameterValue::String("Name".to_string())),
            )
            .with_concurrency(ConcurrencyScope::AccountRegion, Some(10), None);
        Self { descriptor }
    }
}

impl Default for TagReportAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for TagReportAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        let tag_key = request.parameters.get_str("tag_key").unwrap_or("Name");
        let tag_value = request.target.tags.get(tag_key);
        info!(
            execution_id = %request.execution_id,
            resource = %request.target.target_key(),
            dry_run = request.dry_run,
            "标签报告: {}={:?}",
            tag_key,
            tag_value
        );
        Ok(ActionOutcome::Done(json!({
            "resource": request.target.target_key(),
            "tag_key": tag_key,
            "tag_value": tag_value,
            "dry_run": request.dry_run,
        })))
    }

    async fn check_completion(
        &self,
        request: &ActionRequest,
        _token: &CompletionToken,
    ) -> Result<ActionOutcome> {
        self.invoke(request).await
    }
}
