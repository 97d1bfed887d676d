//! # automator-worker
//!
//! 执行引擎、运行历史查询和内置动作。

pub mod actions;
pub mod engine;
pub mod history;

pub use engine::{CycleReport, EngineSettings, ExecutionEngine, RecoveryReport};
pub use history::run_history;
