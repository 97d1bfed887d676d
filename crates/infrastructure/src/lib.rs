//! # automator-infrastructure
//!
//! 存储实现（SQLite 与内存）、内存事件总线、静态资源清单、
//! 执行记录清理服务以及结构化日志。

pub mod cleanup_service;
pub mod database;
pub mod event_bus;
pub mod inventory;
pub mod memory;
pub mod observability;

pub use cleanup_service::{CleanupService, CleanupStats};
pub use database::*;
pub use event_bus::{EventPublisher, InMemoryEventBus};
pub use inventory::InventoryResourceLister;
pub use memory::*;
pub use observability::*;
