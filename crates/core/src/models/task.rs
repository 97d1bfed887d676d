use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::event::TaskEvent;
use super::target::ScopeKey;
use crate::errors::{AutomatorError, Result};

/// 原始动作参数（名称 -> JSON值），注册时按动作声明的参数模式校验
pub type RawParameters = serde_json::Map<String, serde_json::Value>;

/// 默认CRON时区
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// 默认任务超时时间（秒）
pub const DEFAULT_TASK_TIMEOUT_SECONDS: u64 = 3600;

/// 任务定义
///
/// 把一个动作、一组参数和目标范围绑定在一起，由CRON表达式或外部事件触发。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符，由存储分配
/// - `name`: 任务名称，全局唯一
/// - `action`: 要执行的动作名称，必须已在动作注册表中注册
/// - `schedule`: 调度配置，CRON表达式和/或事件触发器
/// - `timezone`: CRON表达式按哪个IANA时区解释，默认UTC
/// - `scope`: 目标范围（账户 × 区域 × 资源类型 × 标签过滤器）
/// - `parameters`: 动作参数
/// - `concurrency_limit`: 覆盖动作声明的单范围并发上限
/// - `timeout_seconds`: 执行实例从创建起的最长存活时间
/// - `dry_run`: 透传给动作，动作只报告不修改
/// - `status`: 任务状态（ACTIVE/INACTIVE），停用后不再创建新的执行实例
/// - `last_fired_at`: 最近一次按计划触发的时间点
///
/// 执行开始后任务定义不可修改，只能在两次运行之间编辑。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub action: String,
    #[serde(default)]
    pub schedule: TaskSchedule,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub scope: TargetScope,
    #[serde(default)]
    pub parameters: RawParameters,
    #[serde(default)]
    pub concurrency_limit: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECONDS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_status() -> TaskStatus {
    TaskStatus::Active
}

/// 调度配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskSchedule {
    /// cron 表达式，支持5段（分钟精度）或6/7段格式
    #[serde(default)]
    pub cron: Option<String>,
    /// 事件触发器，任意一个匹配即触发
    #[serde(default)]
    pub events: Vec<EventTrigger>,
}

/// 事件触发器
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventTrigger {
    pub source: String,
    pub event_type: String,
}

impl EventTrigger {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
        }
    }

    pub fn matches(&self, event: &TaskEvent) -> bool {
        self.source == event.source && self.event_type == event.event_type
    }
}

/// 目标范围
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetScope {
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub resource_type: String,
    /// 标签过滤器，语法见 `TagFilterSet`
    #[serde(default)]
    pub tag_filter: Option<String>,
}

impl TargetScope {
    pub fn new(
        accounts: Vec<String>,
        regions: Vec<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            regions,
            resource_type: resource_type.into(),
            tag_filter: None,
        }
    }

    /// 展开为 账户 × 区域 的范围列表
    pub fn scopes(&self) -> Vec<ScopeKey> {
        self.accounts
            .iter()
            .flat_map(|account| {
                self.regions
                    .iter()
                    .map(move |region| ScopeKey::new(account.clone(), region.clone()))
            })
            .collect()
    }

    /// 按事件携带的账户/区域收窄范围，事件不在范围内时返回空
    pub fn narrowed(&self, account: Option<&str>, region: Option<&str>) -> Vec<ScopeKey> {
        self.scopes()
            .into_iter()
            .filter(|scope| account.map_or(true, |a| scope.account == a))
            .filter(|scope| region.map_or(true, |r| scope.region == r))
            .collect()
    }
}

/// 任务状态
///
/// - `Active`: 任务处于活跃状态，可以正常调度
/// - `Inactive`: 任务被停用，不再创建新的执行实例，已在运行的不受影响
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "ACTIVE",
            TaskStatus::Inactive => "INACTIVE",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "ACTIVE" => Ok(TaskStatus::Active),
            "INACTIVE" => Ok(TaskStatus::Inactive),
            _ => Err(format!("Invalid task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub action: Option<String>,
    pub limit: Option<i64>,
}

impl TaskDefinition {
    /// 创建新任务
    pub fn new(name: impl Into<String>, action: impl Into<String>, scope: TargetScope) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储生成
            name: name.into(),
            description: None,
            action: action.into(),
            schedule: TaskSchedule::default(),
            timezone: default_timezone(),
            scope,
            parameters: RawParameters::new(),
            concurrency_limit: None,
            timeout_seconds: DEFAULT_TASK_TIMEOUT_SECONDS,
            dry_run: false,
            status: TaskStatus::Active,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_cron(mut self, expr: impl Into<String>) -> Self {
        self.schedule.cron = Some(expr.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// 解析任务时区
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AutomatorError::InvalidTimezone {
                timezone: self.timezone.clone(),
            })
    }

    pub fn with_event(mut self, trigger: EventTrigger) -> Self {
        self.schedule.events.push(trigger);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_tag_filter(mut self, filter: impl Into<String>) -> Self {
        self.scope.tag_filter = Some(filter.into());
        self
    }

    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// 检查任务是否处于活跃状态
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Active)
    }

    /// 是否有任意事件触发器匹配
    pub fn is_triggered_by(&self, event: &TaskEvent) -> bool {
        self.schedule.events.iter().any(|t| t.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> TargetScope {
        TargetScope::new(
            vec!["111111111111".into(), "222222222222".into()],
            vec!["eu-west-1".into(), "us-east-1".into()],
            "Instance",
        )
    }

    #[test]
    fn test_scopes_cartesian_product() {
        let scopes = scope().scopes();
        assert_eq!(scopes.len(), 4);
        assert_eq!(scopes[0], ScopeKey::new("111111111111", "eu-west-1"));
        assert_eq!(scopes[3], ScopeKey::new("222222222222", "us-east-1"));
    }

    #[test]
    fn test_narrowed_scope() {
        let s = scope();
        assert_eq!(s.narrowed(Some("222222222222"), None).len(), 2);
        assert_eq!(
            s.narrowed(Some("222222222222"), Some("eu-west-1")),
            vec![ScopeKey::new("222222222222", "eu-west-1")]
        );
        assert!(s.narrowed(Some("999999999999"), None).is_empty());
        assert_eq!(s.narrowed(None, None).len(), 4);
    }

    #[test]
    fn test_task_defaults_from_toml() {
        let task: TaskDefinition = toml::from_str(
            r#"
name = "nightly-snapshots"
action = "noop-tag-report"

[schedule]
cron = "0 2 * * *"

[scope]
accounts = ["111111111111"]
regions = ["eu-west-1"]
resource_type = "Volume"
tag_filter = "Backup=true"
"#,
        )
        .expect("parse task");
        assert!(task.is_active());
        assert_eq!(task.timeout_seconds, DEFAULT_TASK_TIMEOUT_SECONDS);
        assert!(!task.dry_run);
        assert_eq!(task.schedule.cron.as_deref(), Some("0 2 * * *"));
        assert!(task.schedule.events.is_empty());
        assert_eq!(task.timezone, DEFAULT_TIMEZONE);
        assert_eq!(task.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_timezone_parsing() {
        let task = TaskDefinition::new("t", "a", scope()).with_timezone("Asia/Tokyo");
        assert_eq!(task.tz().unwrap(), Tz::Asia__Tokyo);

        let err = TaskDefinition::new("t", "a", scope())
            .with_timezone("Mars/Olympus")
            .tz()
            .unwrap_err();
        assert!(matches!(err, AutomatorError::InvalidTimezone { .. }));
        assert!(err.is_permanent());
    }
}
