use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum AutomatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务定义未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("任务定义已存在: {name}")]
    TaskAlreadyExists { name: String },

    #[error("任务 {id} 仍有未结束的执行实例，不能修改")]
    TaskInFlight { id: i64 },

    #[error("任务 {id} 已停用")]
    TaskInactive { id: i64 },

    #[error("执行实例未找到: {id}")]
    ExecutionNotFound { id: String },

    #[error("执行实例 {id} 已被并发修改 (期望版本 {expected_version})")]
    ConcurrentModification { id: String, expected_version: i64 },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("动作未注册: {name}")]
    ActionNotFound { name: String },

    #[error("动作重复注册: {name}")]
    DuplicateAction { name: String },

    #[error("动作 {action} 不支持资源类型 {resource_type}")]
    UnsupportedResourceType {
        action: String,
        resource_type: String,
    },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时区: {timezone}")]
    InvalidTimezone { timezone: String },

    #[error("无效的动作参数: {0}")]
    InvalidParameters(String),

    #[error("无效的标签过滤器: {filter} - {message}")]
    InvalidTagFilter { filter: String, message: String },

    #[error("资源查询失败: {0}")]
    ResourceListing(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AutomatorError {
    /// 参数或定义层面的错误，重试也无法恢复
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AutomatorError::InvalidParameters(_)
                | AutomatorError::ActionNotFound { .. }
                | AutomatorError::UnsupportedResourceType { .. }
                | AutomatorError::InvalidCron { .. }
                | AutomatorError::InvalidTimezone { .. }
                | AutomatorError::InvalidTagFilter { .. }
        )
    }
}

impl From<serde_json::Error> for AutomatorError {
    fn from(e: serde_json::Error) -> Self {
        AutomatorError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, AutomatorError>;
