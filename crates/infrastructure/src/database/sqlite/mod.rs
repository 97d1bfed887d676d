pub mod sqlite_audit_repository;
pub mod sqlite_execution_repository;
pub mod sqlite_task_definition_repository;

pub use sqlite_audit_repository::SqliteAuditRepository;
pub use sqlite_execution_repository::SqliteExecutionRepository;
pub use sqlite_task_definition_repository::SqliteTaskDefinitionRepository;
