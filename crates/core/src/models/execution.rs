use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{CompletionToken, ValidatedParameters};
use super::target::ResourceTarget;
use super::task::TaskDefinition;
use crate::errors::{AutomatorError, Result};

/// 执行实例状态
///
/// ```text
/// Pending -> Queued -> Running -> Succeeded
///                         |  \-> WaitingForCompletion -> Succeeded / Failed
///                         |            |
///                         v            v
///                      Retrying -> Queued (重新准入)
/// ```
///
/// 任意非终态都可以转到 `TimedOut`（超过截止时间）或 `Failed`（取消）。
/// `Succeeded`、`Failed`、`TimedOut` 是终态，不可再变化。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "WAITING_FOR_COMPLETION")]
    WaitingForCompletion,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 8] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
        ExecutionStatus::WaitingForCompletion,
        ExecutionStatus::Retrying,
        ExecutionStatus::Succeeded,
        ExecutionStatus::Failed,
        ExecutionStatus::TimedOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::WaitingForCompletion => "WAITING_FOR_COMPLETION",
            ExecutionStatus::Retrying => "RETRYING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }

    /// 是否占用准入槽位
    pub fn holds_slot(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Queued | ExecutionStatus::Running | ExecutionStatus::WaitingForCompletion
        )
    }

    pub fn can_transition_to(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(to, TimedOut | Failed) {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Queued)
                | (Queued, Running)
                | (Running, Succeeded)
                | (Running, WaitingForCompletion)
                | (Running, Retrying)
                | (WaitingForCompletion, WaitingForCompletion)
                | (WaitingForCompletion, Succeeded)
                | (WaitingForCompletion, Retrying)
                | (Retrying, Queued)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = AutomatorError;

    fn from_str(s: &str) -> Result<Self> {
        ExecutionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AutomatorError::Serialization(format!("未知的执行状态: {s}")))
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<ExecutionStatus>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 执行实例的触发来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerSource {
    #[serde(rename = "SCHEDULE")]
    Schedule,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Schedule => "SCHEDULE",
            TriggerSource::Event => "EVENT",
            TriggerSource::Manual => "MANUAL",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = AutomatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCHEDULE" => Ok(TriggerSource::Schedule),
            "EVENT" => Ok(TriggerSource::Event),
            "MANUAL" => Ok(TriggerSource::Manual),
            _ => Err(AutomatorError::Serialization(format!("未知的触发来源: {s}"))),
        }
    }
}

/// 失败类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// 可重试的瞬时错误
    Transient,
    /// 不可重试的错误（含参数错误、动作未注册）
    Permanent,
    /// 瞬时错误但已用尽重试次数
    RetriesExhausted,
    /// 超过截止时间
    Timeout,
    /// 被显式取消
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "TRANSIENT",
            FailureKind::Permanent => "PERMANENT",
            FailureKind::RetriesExhausted => "RETRIES_EXHAUSTED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for FailureKind {
    type Err = AutomatorError;

    fn from_str(s: &str) -> Result<Self> {
        [
            FailureKind::Transient,
            FailureKind::Permanent,
            FailureKind::RetriesExhausted,
            FailureKind::Timeout,
            FailureKind::Cancelled,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| AutomatorError::Serialization(format!("未知的失败类型: {s}")))
    }
}

/// 最近一次失败的详细信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// 执行实例：一个动作针对一个已解析资源目标的一次具体运行
///
/// 只由执行引擎修改；每次写入都以 `version` 做乐观并发控制。
/// `id` 同时作为传给动作的去重令牌。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: String,
    pub task_id: i64,
    pub task_name: String,
    /// 任务ID + 目标键 + 触发点，重复评估同一触发点时用于去重
    pub dedup_key: String,
    /// 触发点：计划时间（RFC3339）或事件ID
    pub tick: String,
    pub target: ResourceTarget,
    pub action: String,
    pub parameters: ValidatedParameters,
    pub dry_run: bool,
    pub source: TriggerSource,
    pub status: ExecutionStatus,
    /// 已开始的尝试次数，Pending 时为0
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub first_queued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// 下一次准入检查、重试或完成检查的时间
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    pub completion_token: Option<CompletionToken>,
    pub result: Option<serde_json::Value>,
    pub failure: Option<ExecutionFailure>,
    pub cancel_requested: bool,
    pub version: i64,
}

/// 创建执行实例所需的上下文
#[derive(Debug, Clone)]
pub struct ExecutionSeed<'a> {
    pub task: &'a TaskDefinition,
    pub target: ResourceTarget,
    pub parameters: ValidatedParameters,
    pub source: TriggerSource,
    pub tick: String,
    pub max_attempts: u32,
}

impl Execution {
    pub fn dedup_key(task_id: i64, target_key: &str, tick: &str) -> String {
        format!("{task_id}:{target_key}@{tick}")
    }

    pub fn new(seed: ExecutionSeed<'_>, now: DateTime<Utc>) -> Self {
        let timeout = i64::try_from(seed.task.timeout_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: seed.task.id,
            task_name: seed.task.name.clone(),
            dedup_key: Self::dedup_key(seed.task.id, &seed.target.target_key(), &seed.tick),
            tick: seed.tick,
            target: seed.target,
            action: seed.task.action.clone(),
            parameters: seed.parameters,
            dry_run: seed.task.dry_run,
            source: seed.source,
            status: ExecutionStatus::Pending,
            attempt: 0,
            max_attempts: seed.max_attempts,
            created_at: now,
            first_queued_at: None,
            updated_at: now,
            next_attempt_at: None,
            deadline: now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            completion_token: None,
            result: None,
            failure: None,
            cancel_requested: false,
            version: 0,
        }
    }

    /// 执行一次状态转换，返回转换前的状态
    ///
    /// 进入 `Queued` 时尝试次数加一，并记录首次入队时间。
    pub fn transition(&mut self, to: ExecutionStatus, now: DateTime<Utc>) -> Result<ExecutionStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(AutomatorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        if to == ExecutionStatus::Queued {
            self.attempt += 1;
            self.first_queued_at.get_or_insert(now);
            self.next_attempt_at = None;
        }
        if to.is_terminal() {
            self.next_attempt_at = None;
        }
        self.status = to;
        self.updated_at = now;
        Ok(from)
    }

    /// 以失败结束，`Timeout` 类型对应 `TimedOut` 状态，其余对应 `Failed`
    pub fn finish_with_failure(
        &mut self,
        failure: ExecutionFailure,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStatus> {
        let to = if failure.kind == FailureKind::Timeout {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Failed
        };
        let from = self.transition(to, now)?;
        self.failure = Some(failure);
        Ok(from)
    }

    pub fn succeed(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> Result<ExecutionStatus> {
        let from = self.transition(ExecutionStatus::Succeeded, now)?;
        self.result = Some(result);
        self.failure = None;
        Ok(from)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    pub fn retries_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
