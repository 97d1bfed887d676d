//! # ops-automator
//!
//! 多账户多区域运维任务调度系统的可执行程序：加载配置、装配各组件并管理生命周期。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
