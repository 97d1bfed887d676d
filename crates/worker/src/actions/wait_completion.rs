use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use automator_core::{
    ActionDescriptor, ActionFailure, ActionHandler, ActionOutcome, ActionRequest,
    CompletionToken, ParameterKind, ParameterSpec, ParameterValue, Result,
};

pub const WAIT_COMPLETION_ACTION: &str = "wait-completion";

const TOKEN_PREFIX: &str = "ready-at:";

/// 长时间运行的演示动作：调用后返回完成令牌，到达指定时长后完成检查返回结果
///
/// 令牌中保存完成时间点，进程重启后以同一令牌检查得到相同结果。
pub struct WaitCompletionAction {
    descriptor: ActionDescriptor,
}

impl WaitCompletionAction {
    pub fn new() -> Self {
        let descriptor = ActionDescriptor::new(WAIT_COMPLETION_ACTION)
            .with_parameter(
                ParameterSpec::new("duration_seconds", ParameterKind::Integer)
                    .with_default(ParameterValue::Integer(60))
                    .with_range(Some(0), Some(86_400)),
            )
            .long_running(30);
        Self { descriptor }
    }

    fn ready_at(token: &CompletionToken) -> Option<DateTime<Utc>> {
        token
            .as_str()
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

impl Default for WaitCompletionAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for WaitCompletionAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        let seconds = request.parameters.get_i64("duration_seconds").unwrap_or(60);
        let ready_at = Utc::now() + Duration::try_seconds(seconds).unwrap_or_default();
        Ok(ActionOutcome::InProgress(CompletionToken::new(format!(
            "{TOKEN_PREFIX}{}",
            ready_at.to_rfc3339()
        ))))
    }

    async fn check_completion(
        &self,
        request: &ActionRequest,
        token: &CompletionToken,
    ) -> Result<ActionOutcome> {
        let Some(ready_at) = Self::ready_at(token) else {
            return Ok(ActionOutcome::Error(ActionFailure::permanent(
                "InvalidToken",
                format!("无法识别的完成令牌: {}", token.as_str()),
            )));
        };
        if Utc::now() < ready_at {
            return Ok(ActionOutcome::InProgress(token.clone()));
        }
        Ok(ActionOutcome::Done(json!({
            "resource": request.target.target_key(),
            "completed_at": ready_at.to_rfc3339(),
        })))
    }
}
