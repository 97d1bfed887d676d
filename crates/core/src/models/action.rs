//! # 动作元数据
//!
//! 动作是作用于单个资源的可插拔操作单元。每个动作在启动时通过
//! [`ActionDescriptor`] 声明：
//!
//! - 参数模式（名称、类型、是否必填、默认值、取值范围）
//! - 支持的资源类型
//! - 全局和单范围并发上限，以及范围的粒度
//! - 可重试错误判定规则和重试策略
//! - 是否为长时间运行动作，以及完成检查间隔
//!
//! 描述符在运行期间只读。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::task::RawParameters;
use super::target::ResourceTarget;
use crate::errors::{AutomatorError, Result};

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    StringList,
}

/// 参数声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ParameterValue>,
    /// 允许的取值，空表示不限制
    #[serde(default)]
    pub allowed: Vec<ParameterValue>,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            allowed: Vec::new(),
            min: None,
            max: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: ParameterValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<ParameterValue>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    fn convert(&self, value: &serde_json::Value) -> Result<ParameterValue> {
        let mismatch = || {
            AutomatorError::InvalidParameters(format!(
                "参数 {} 类型应为 {:?}，实际值: {}",
                self.name, self.kind, value
            ))
        };
        let converted = match self.kind {
            ParameterKind::String => ParameterValue::String(value.as_str().ok_or_else(mismatch)?.to_string()),
            ParameterKind::Integer => ParameterValue::Integer(value.as_i64().ok_or_else(mismatch)?),
            ParameterKind::Boolean => ParameterValue::Boolean(value.as_bool().ok_or_else(mismatch)?),
            ParameterKind::StringList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(item.as_str().ok_or_else(mismatch)?.to_string());
                }
                ParameterValue::StringList(list)
            }
        };

        if let ParameterValue::Integer(n) = converted {
            if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
                return Err(AutomatorError::InvalidParameters(format!(
                    "参数 {} 的值 {} 超出范围 [{:?}, {:?}]",
                    self.name, n, self.min, self.max
                )));
            }
        }

        if !self.allowed.is_empty() && !self.allowed.contains(&converted) {
            return Err(AutomatorError::InvalidParameters(format!(
                "参数 {} 的值 {} 不在允许范围内",
                self.name, value
            )));
        }

        Ok(converted)
    }
}

/// 强类型参数值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    StringList(Vec<String>),
}

/// 按动作参数模式校验后的参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedParameters(BTreeMap<String, ParameterValue>);

impl ValidatedParameters {
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ParameterValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ParameterValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(ParameterValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_list(&self, name: &str) -> Option<&[String]> {
        match self.0.get(name) {
            Some(ParameterValue::StringList(list)) => Some(list.as_slice()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 并发范围粒度，决定准入控制的分桶方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    /// 整个动作共用一个桶
    Global,
    /// 每个账户一个桶
    Account,
    /// 每个账户/区域一个桶
    AccountRegion,
}

impl ConcurrencyScope {
    pub fn bucket_scope(&self, target: &ResourceTarget) -> String {
        match self {
            ConcurrencyScope::Global => "*".to_string(),
            ConcurrencyScope::Account => target.account.clone(),
            ConcurrencyScope::AccountRegion => format!("{}/{}", target.account, target.region),
        }
    }
}

/// 可重试错误判定规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryablePredicate {
    /// 采信动作返回的 retryable 标记
    HandlerFlag,
    /// retryable 标记为真，或错误码在列表中
    FlagOrCodes(Vec<String>),
    /// 从不重试
    Never,
}

/// 重试策略：指数退避 + 抖动，受最大间隔和最大尝试次数约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（包括第一次）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub multiplier: f64,
    /// 抖动比例，只向上叠加
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 10_000, // 10秒
            max_delay_ms: 60_000,  // 1分钟
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AutomatorError::Configuration(
                "retry.max_attempts 必须大于0".to_string(),
            ));
        }
        if self.base_delay_ms == 0 || self.max_delay_ms < self.base_delay_ms {
            return Err(AutomatorError::Configuration(format!(
                "重试间隔配置无效: base={}ms, max={}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(AutomatorError::Configuration(format!(
                "retry.multiplier 必须是不小于1的有限数: {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(AutomatorError::Configuration(format!(
                "retry.jitter_factor 必须在 [0, 1] 之间: {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// 动作描述符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 支持的资源类型，空表示不限制
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// 整个动作的全局并发上限
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    /// 单个范围桶的并发上限
    #[serde(default)]
    pub scope_concurrency: Option<u32>,
    pub concurrency_scope: ConcurrencyScope,
    pub retryable: RetryablePredicate,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub long_running: bool,
    /// 完成检查间隔（秒）
    pub completion_check_interval_seconds: u64,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            resource_types: Vec::new(),
            parameters: Vec::new(),
            max_concurrency: None,
            scope_concurrency: None,
            concurrency_scope: ConcurrencyScope::Global,
            retryable: RetryablePredicate::HandlerFlag,
            retry: RetryPolicy::default(),
            long_running: false,
            completion_check_interval_seconds: 60,
        }
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_resource_types(mut self, types: &[&str]) -> Self {
        self.resource_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_concurrency(
        mut self,
        scope: ConcurrencyScope,
        scope_limit: Option<u32>,
        global_limit: Option<u32>,
    ) -> Self {
        self.concurrency_scope = scope;
        self.scope_concurrency = scope_limit;
        self.max_concurrency = global_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retryable(mut self, predicate: RetryablePredicate) -> Self {
        self.retryable = predicate;
        self
    }

    pub fn long_running(mut self, completion_check_interval_seconds: u64) -> Self {
        self.long_running = true;
        self.completion_check_interval_seconds = completion_check_interval_seconds;
        self
    }

    pub fn supports_resource_type(&self, resource_type: &str) -> bool {
        self.resource_types.is_empty() || self.resource_types.iter().any(|t| t == resource_type)
    }

    pub fn is_retryable(&self, failure: &ActionFailure) -> bool {
        match &self.retryable {
            RetryablePredicate::HandlerFlag => failure.retryable,
            RetryablePredicate::FlagOrCodes(codes) => {
                failure.retryable || codes.iter().any(|c| c == &failure.code)
            }
            RetryablePredicate::Never => false,
        }
    }

    /// 按参数模式校验原始参数，得到强类型参数
    pub fn validate_parameters(&self, raw: &RawParameters) -> Result<ValidatedParameters> {
        if let Some(unknown) = raw
            .keys()
            .find(|key| !self.parameters.iter().any(|spec| &spec.name == *key))
        {
            return Err(AutomatorError::InvalidParameters(format!(
                "动作 {} 不接受参数 {}",
                self.name, unknown
            )));
        }

        let mut values = BTreeMap::new();
        for spec in &self.parameters {
            match raw.get(&spec.name) {
                Some(value) if !value.is_null() => {
                    values.insert(spec.name.clone(), spec.convert(value)?);
                }
                _ => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(AutomatorError::InvalidParameters(format!(
                            "动作 {} 缺少必填参数 {}",
                            self.name, spec.name
                        )));
                    }
                }
            }
        }
        Ok(ValidatedParameters(values))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AutomatorError::Configuration("动作名称不能为空".to_string()));
        }
        if self.max_concurrency == Some(0) || self.scope_concurrency == Some(0) {
            return Err(AutomatorError::Configuration(format!(
                "动作 {} 的并发上限不能为0",
                self.name
            )));
        }
        if self.long_running && self.completion_check_interval_seconds == 0 {
            return Err(AutomatorError::Configuration(format!(
                "长时间运行动作 {} 必须设置完成检查间隔",
                self.name
            )));
        }
        self.retry.validate()
    }
}

/// 动作返回的失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    /// 动作定义的错误码，如 "Throttling"、"InvalidParameterValue"
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ActionFailure {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// 完成令牌，由长时间运行动作返回，内容对调度器不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionToken(pub String);

impl CompletionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 动作调用或完成检查的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Done(serde_json::Value),
    InProgress(CompletionToken),
    Error(ActionFailure),
}
