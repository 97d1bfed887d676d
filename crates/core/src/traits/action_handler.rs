//! 动作处理器接口
//!
//! 动作是作用于单个资源的可插拔逻辑，例如创建快照、调整容量。
//! 调度核心只通过此接口调用动作，不关心具体实现。
//!
//! ## 幂等
//!
//! 每次调用都会带上执行实例ID作为去重令牌。进程重启后，处于 `Running`
//! 状态的实例会以同一个令牌再次调用 `invoke`，动作应据此识别重复请求。
//!
//! ## 长时间运行
//!
//! 长时间运行动作在 `invoke` 中返回 `InProgress(token)`，之后由引擎按
//! 描述符中的间隔调用 `check_completion` 直到返回 `Done` 或 `Error`。

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{
    ActionDescriptor, ActionOutcome, CompletionToken, ResourceTarget, ValidatedParameters,
};

/// 传给动作的调用请求
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// 执行实例ID，同时作为去重令牌
    pub execution_id: String,
    pub task_name: String,
    pub target: ResourceTarget,
    pub parameters: ValidatedParameters,
    pub attempt: u32,
    pub dry_run: bool,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn descriptor(&self) -> &ActionDescriptor;

    /// 对目标资源执行动作
    ///
    /// 动作自身的失败通过 `ActionOutcome::Error` 返回；`Err` 表示调用本身
    /// 出现了意料之外的错误，引擎按瞬时错误处理。
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome>;

    /// 检查长时间运行动作是否完成
    async fn check_completion(
        &self,
        request: &ActionRequest,
        token: &CompletionToken,
    ) -> Result<ActionOutcome>;
}
