//! # automator-dispatcher
//!
//! 调度侧组件：CRON评估、资源选择、动作注册表、准入控制和重试退避。

pub mod action_registry;
pub mod admission;
pub mod cron_utils;
pub mod resource_selector;
pub mod retry;
pub mod scheduler;
pub mod task_catalog;

pub use action_registry::{ActionRegistry, ActionRegistryBuilder};
pub use admission::{AdmissionController, AdmissionDecision, BucketKey};
pub use cron_utils::{CronScheduler, DueTick};
pub use resource_selector::ResourceSelector;
pub use retry::RetryDecision;
pub use scheduler::{EvaluationReport, TaskEvaluationError, TaskScheduler};
pub use task_catalog::{SeedReport, TaskCatalog};
