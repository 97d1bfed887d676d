use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::database::DatabaseConfig;
use super::runtime::{EngineConfig, InventoryConfig, RetentionConfig, SchedulerConfig};
use crate::config::ConfigValidator;
use crate::errors::AutomatorError;
use crate::models::TaskDefinition;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/automator.toml";

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
    pub retention: RetentionConfig,
    pub inventory: InventoryConfig,
    /// 启动时写入存储的任务定义
    pub tasks: Vec<TaskDefinition>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 显式指定的文件必须存在；未指定时依次尝试默认路径，都不存在则使用内置默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = [DEFAULT_CONFIG_PATH, "automator.toml", "/etc/automator/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // 环境变量覆盖优先级最高
        builder = builder.add_source(
            Environment::with_prefix("AUTOMATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验全部配置段
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.engine.validate().context("执行引擎配置验证失败")?;
        self.retention.validate().context("保留策略配置验证失败")?;
        self.inventory.validate().context("资源清单配置验证失败")?;
        self.validate_tasks().context("任务定义验证失败")?;
        Ok(())
    }

    fn validate_tasks(&self) -> std::result::Result<(), AutomatorError> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(AutomatorError::Configuration("任务名称不能为空".to_string()));
            }
            if !names.insert(task.name.as_str()) {
                return Err(AutomatorError::TaskAlreadyExists {
                    name: task.name.clone(),
                });
            }
            if task.timeout_seconds == 0 {
                return Err(AutomatorError::Configuration(format!(
                    "任务 {} 的超时时间必须大于0",
                    task.name
                )));
            }
        }
        Ok(())
    }
}
