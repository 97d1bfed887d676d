//! 动作注册表
//!
//! 启动时通过 [`ActionRegistryBuilder`] 注册全部动作，`build` 之后得到只读的
//! [`ActionRegistry`]，运行期间不再变化，可以在线程间自由共享。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use automator_core::{
    ActionDescriptor, ActionHandler, AutomatorError, Result, TaskDefinition, TagFilterSet,
    ValidatedParameters,
};

use crate::cron_utils::CronScheduler;

#[derive(Default)]
pub struct ActionRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册动作，名称重复或描述符无效时报错
    pub fn register(mut self, handler: Arc<dyn ActionHandler>) -> Result<Self> {
        let descriptor = handler.descriptor();
        descriptor.validate()?;

        let name = descriptor.name.clone();
        if self.handlers.contains_key(&name) {
            return Err(AutomatorError::DuplicateAction { name });
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        info!("动作注册表已构建，共 {} 个动作: {:?}", names.len(), names);
        ActionRegistry {
            handlers: self.handlers,
        }
    }
}

/// 只读的动作注册表：名称 -> 描述符 + 处理器
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ActionHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| AutomatorError::ActionNotFound {
                name: name.to_string(),
            })
    }

    pub fn descriptor(&self, name: &str) -> Result<&ActionDescriptor> {
        self.handlers
            .get(name)
            .map(|h| h.descriptor())
            .ok_or_else(|| AutomatorError::ActionNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn descriptors(&self) -> Vec<&ActionDescriptor> {
        let mut descriptors: Vec<&ActionDescriptor> =
            self.handlers.values().map(|h| h.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 校验任务定义：动作存在、资源类型受支持、CRON、时区和标签过滤器有效、参数符合模式
    pub fn validate_task(&self, task: &TaskDefinition) -> Result<ValidatedParameters> {
        let descriptor = self.descriptor(&task.action)?;

        if !descriptor.supports_resource_type(&task.scope.resource_type) {
            return Err(AutomatorError::UnsupportedResourceType {
                action: descriptor.name.clone(),
                resource_type: task.scope.resource_type.clone(),
            });
        }
        if let Some(expr) = &task.schedule.cron {
            CronScheduler::validate_cron_expression(expr)?;
        }
        task.tz()?;
        if let Some(filter) = &task.scope.tag_filter {
            TagFilterSet::parse(filter)?;
        }
        if task.concurrency_limit == Some(0) {
            return Err(AutomatorError::InvalidParameters(format!(
                "任务 {} 的并发上限不能为0",
                task.name
            )));
        }
        if task.timeout_seconds == 0 {
            return Err(AutomatorError::InvalidParameters(format!(
                "任务 {} 的超时时间必须大于0",
                task.name
            )));
        }

        descriptor.validate_parameters(&task.parameters)
    }
}
