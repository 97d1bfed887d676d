//! # 数据模型
//!
//! 运维自动化调度的核心数据结构。
//!
//! ## 核心模型
//!
//! ### TaskDefinition - 任务定义
//! 把动作、参数和目标范围（账户 × 区域 × 资源类型 × 标签过滤器）绑定在一起，
//! 由CRON表达式或外部事件触发。
//!
//! ### ResourceTarget - 资源目标
//! 每个调度周期重新解析，只随执行实例持久化。
//!
//! ### Execution - 执行实例
//! 动作针对单个资源目标的一次运行，由执行引擎驱动状态机。
//!
//! ### ActionDescriptor - 动作描述符
//! 启动时注册，声明参数模式、并发上限、重试策略和是否长时间运行。
//!
//! ### AuditRecord - 审计记录
//! 每次状态转换一条，终态附带快照。
//!
//! ## 执行状态流转
//! ```text
//! Pending → Queued → Running → Succeeded
//!                      ↓   ↘
//!                 Retrying  WaitingForCompletion → Succeeded / Failed
//!                      ↓
//!                   Queued ...
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`，状态字段使用枚举并实现了 SQLite 的
//! `sqlx::Type`/`Encode`/`Decode`。

pub mod action;
pub mod audit;
pub mod event;
pub mod execution;
pub mod history;
pub mod target;
pub mod task;

pub use action::*;
pub use audit::*;
pub use event::*;
pub use execution::*;
pub use history::*;
pub use target::*;
pub use task::*;
