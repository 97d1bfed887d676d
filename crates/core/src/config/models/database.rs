use serde::{Deserialize, Serialize};

use crate::config::ConfigValidator;
use crate::errors::{AutomatorError, Result};

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite 连接串，`sqlite::memory:` 表示内存数据库
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/automator.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(AutomatorError::Configuration("数据库URL不能为空".to_string()));
        }

        if !self.url.starts_with("sqlite:") {
            return Err(AutomatorError::Configuration(
                "数据库URL必须是SQLite格式".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(AutomatorError::Configuration("最大连接数必须大于0".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(AutomatorError::Configuration(
                "最小连接数不能大于最大连接数".to_string(),
            ));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(AutomatorError::Configuration("连接超时时间必须大于0".to_string()));
        }

        Ok(())
    }
}
