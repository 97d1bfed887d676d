use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use automator_core::{AutomatorError, Result};

/// 首次评估或长时间停机后最多回看的时间窗口
const MAX_LOOKBACK_HOURS: i64 = 24;

/// 到期的触发点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTick {
    /// 窗口内最近的触发点，更早的触发点合并到它
    pub tick: DateTime<Utc>,
    /// 窗口内最早的触发点
    pub earliest: DateTime<Utc>,
    /// 被合并掉的触发点数量
    pub missed: usize,
}

impl DueTick {
    /// 最早的触发点是否已超过宽限期
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.missed > 0 && now - self.earliest > grace
    }
}

/// CRON表达式解析和调度工具
///
/// 支持5字段（分 时 日 月 周，秒固定为0）和 `cron` crate 的6/7字段格式。
/// 表达式按 `timezone` 的本地时间解释（默认UTC），输入输出的时间点一律是UTC。
pub struct CronScheduler {
    expr: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> Result<Self> {
        let normalized = Self::normalize(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| AutomatorError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expr: cron_expr.to_string(),
            schedule,
            timezone: Tz::UTC,
        })
    }

    /// 改为按指定时区解释表达式
    pub fn in_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn ticks_after(&self, from: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .map(|tick| tick.with_timezone(&Utc))
    }

    fn normalize(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ticks_after(from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.ticks_after(from).take(count).collect()
    }

    /// 计算 `(since, now]` 内最近的触发点
    ///
    /// `since` 为上次触发点；从未触发过时传任务创建时间。窗口最长回看24小时，
    /// 窗口内的多个触发点合并为最近的一个。
    pub fn due_tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Option<DueTick> {
        let floor = now - Duration::hours(MAX_LOOKBACK_HOURS);
        let start = since.max(floor);

        let mut earliest = None;
        let mut latest = None;
        let mut count = 0usize;
        for tick in self.ticks_after(start).take_while(|t| *t <= now) {
            earliest.get_or_insert(tick);
            latest = Some(tick);
            count += 1;
        }

        let due = DueTick {
            tick: latest?,
            earliest: earliest?,
            missed: count.saturating_sub(1),
        };
        debug!(
            "CRON {} ({}) 到期: 触发点={}, 合并了 {} 个更早的触发点",
            self.expr,
            self.timezone,
            due.tick.format("%Y-%m-%d %H:%M:%S UTC"),
            due.missed
        );
        Some(due)
    }
}
