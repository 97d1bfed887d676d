use serde::{Deserialize, Serialize};

use crate::config::ConfigValidator;
use crate::errors::{AutomatorError, Result};

fn require_positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(AutomatorError::Configuration(format!("{field} 必须大于0")));
    }
    Ok(())
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 评估间隔（秒）
    pub evaluation_interval_seconds: u64,
    /// 错过的触发点超过此宽限期时记录告警
    pub catch_up_grace_seconds: u64,
    /// 资源查询的最大并行范围数
    pub selection_parallelism: usize,
    /// 每轮最多处理的事件数
    pub event_batch_size: usize,
    /// 事件总线容量
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval_seconds: 30,
            catch_up_grace_seconds: 300,
            selection_parallelism: 8,
            event_batch_size: 64,
            event_channel_capacity: 1024,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> Result<()> {
        require_positive("scheduler.evaluation_interval_seconds", self.evaluation_interval_seconds)?;
        require_positive("scheduler.selection_parallelism", self.selection_parallelism as u64)?;
        require_positive("scheduler.event_batch_size", self.event_batch_size as u64)?;
        require_positive("scheduler.event_channel_capacity", self.event_channel_capacity as u64)
    }
}

/// 执行引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled: bool,
    /// 引擎周期（秒）
    pub cycle_interval_seconds: u64,
    /// 单个周期内同时调用动作的最大数量
    pub max_parallel: usize,
    /// 准入被推迟后再次检查的间隔（秒）
    pub admission_recheck_seconds: u64,
    /// 每个桶的等待队列上限
    pub max_waiting_per_bucket: usize,
    /// 每个周期从存储读取的最大执行实例数
    pub batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_interval_seconds: 5,
            max_parallel: 16,
            admission_recheck_seconds: 15,
            max_waiting_per_bucket: 1000,
            batch_size: 200,
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> Result<()> {
        require_positive("engine.cycle_interval_seconds", self.cycle_interval_seconds)?;
        require_positive("engine.max_parallel", self.max_parallel as u64)?;
        require_positive("engine.admission_recheck_seconds", self.admission_recheck_seconds)?;
        require_positive("engine.max_waiting_per_bucket", self.max_waiting_per_bucket as u64)?;
        if self.batch_size <= 0 {
            return Err(AutomatorError::Configuration(
                "engine.batch_size 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 执行记录保留配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    /// 终态执行实例的保留时长（小时）
    pub retention_hours: u64,
    /// 失败的执行实例是否永久保留
    pub keep_failed: bool,
    pub cleanup_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_hours: 168,
            keep_failed: true,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl ConfigValidator for RetentionConfig {
    fn validate(&self) -> Result<()> {
        require_positive("retention.retention_hours", self.retention_hours)?;
        require_positive("retention.cleanup_interval_seconds", self.cleanup_interval_seconds)
    }
}

/// 资源清单配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InventoryConfig {
    /// TOML 资源清单文件路径
    pub path: Option<String>,
}

impl ConfigValidator for InventoryConfig {
    fn validate(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                return Err(AutomatorError::Configuration(
                    "inventory.path 不能为空字符串".to_string(),
                ));
            }
        }
        Ok(())
    }
}
