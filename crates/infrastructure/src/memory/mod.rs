//! 内存存储实现
//!
//! 与 SQLite 实现语义一致（去重键唯一、版本号条件更新、名称唯一），
//! 用于测试和不需要持久化的嵌入式场景。

mod audit_repository;
mod execution_repository;
mod task_definition_repository;

pub use audit_repository::InMemoryAuditRepository;
pub use execution_repository::InMemoryExecutionRepository;
pub use task_definition_repository::InMemoryTaskDefinitionRepository;
