//! 内置动作
//!
//! - `noop-tag-report`: 同步完成，报告目标资源的指定标签
//! - `wait-completion`: 长时间运行，等待指定时长后完成

mod tag_report;
mod wait_completion;

use std::sync::Arc;

use automator_core::Result;
use automator_dispatcher::ActionRegistryBuilder;

pub use tag_report::TagReportAction;
pub use wait_completion::WaitCompletionAction;

/// 注册全部内置动作
pub fn register_builtin(builder: ActionRegistryBuilder) -> Result<ActionRegistryBuilder> {
    builder
        .register(Arc::new(TagReportAction::new()))?
        .register(Arc::new(WaitCompletionAction::new()))
}
