//! # automator-core
//!
//! 运维自动化调度的核心库：数据模型、错误类型、配置、标签过滤器，以及
//! 动作处理器、资源清单、事件源和各存储的接口定义。

pub mod config;
pub mod errors;
pub mod models;
pub mod tag_filter;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use models::*;
pub use tag_filter::TagFilterSet;
pub use traits::*;

/// 统一的Result类型
pub type AutomatorResult<T> = std::result::Result<T, AutomatorError>;
