//! 准入控制
//!
//! 按 (动作, 范围桶) 维护运行计数和有界的 FIFO 等待队列。执行实例被准入后占用
//! 一个槽位，直到进入 `Retrying` 或终态时释放。同时受动作的全局上限约束。
//!
//! 所有计数在同一把锁内修改；进程重启后由 [`AdmissionController::restore`]
//! 根据持久化的 Queued / Running / WaitingForCompletion 实例重建。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use automator_core::{ActionDescriptor, AutomatorError, Execution, Result};

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accepted,
    /// 保持 Pending，`position` 为在桶等待队列中的位置（从1开始）
    Deferred { position: usize },
}

/// 桶标识：动作名 + 范围（`*`、账户 或 账户/区域）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub action: String,
    pub scope: String,
}

impl BucketKey {
    pub fn for_execution(execution: &Execution, descriptor: &ActionDescriptor) -> Self {
        Self {
            action: execution.action.clone(),
            scope: descriptor.concurrency_scope.bucket_scope(&execution.target),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.action, self.scope)
    }
}

#[derive(Debug)]
struct Waiter {
    execution_id: String,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Bucket {
    running: HashSet<String>,
    waiting: VecDeque<Waiter>,
}

impl Bucket {
    fn position_of(&self, execution_id: &str) -> Option<usize> {
        self.waiting
            .iter()
            .position(|w| w.execution_id == execution_id)
    }

    /// 丢弃长时间没有再次申请准入的队首等待者，避免阻塞整个桶
    fn prune_stale(&mut self, now: DateTime<Utc>, stale_after: Duration) {
        while let Some(front) = self.waiting.front() {
            if now - front.last_seen <= stale_after {
                break;
            }
            warn!("等待者 {} 长时间未再次申请准入，移出等待队列", front.execution_id);
            self.waiting.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct AdmissionState {
    buckets: HashMap<BucketKey, Bucket>,
    global: HashMap<String, usize>,
    holders: HashMap<String, BucketKey>,
}

impl AdmissionState {
    fn occupy(&mut self, execution_id: &str, key: BucketKey) {
        let bucket = self.buckets.entry(key.clone()).or_default();
        bucket.running.insert(execution_id.to_string());
        *self.global.entry(key.action.clone()).or_default() += 1;
        self.holders.insert(execution_id.to_string(), key);
    }

    fn vacate(&mut self, execution_id: &str) -> bool {
        let Some(key) = self.holders.remove(execution_id) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.running.remove(execution_id);
        }
        if let Some(count) = self.global.get_mut(&key.action) {
            *count = count.saturating_sub(1);
        }
        true
    }
}

/// 准入控制器
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    max_waiting_per_bucket: usize,
    stale_after: Duration,
}

impl AdmissionController {
    /// `stale_after` 为等待者两次申请之间允许的最长间隔
    pub fn new(max_waiting_per_bucket: usize, stale_after: Duration) -> Self {
        Self {
            state: Mutex::new(AdmissionState::default()),
            max_waiting_per_bucket: max_waiting_per_bucket.max(1),
            stale_after,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, AdmissionState>> {
        self.state
            .lock()
            .map_err(|e| AutomatorError::Internal(format!("准入状态锁异常: {e}")))
    }

    /// 申请准入
    ///
    /// 桶限制取任务覆盖值，否则取描述符的单范围上限；两者都没有时不限制。
    /// 同一个桶内严格按申请顺序准入。
    pub fn admit(
        &self,
        execution: &Execution,
        descriptor: &ActionDescriptor,
        limit_override: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision> {
        let key = BucketKey::for_execution(execution, descriptor);
        let bucket_limit = limit_override.or(descriptor.scope_concurrency);
        let global_limit = descriptor.max_concurrency;

        let mut state = self.lock()?;
        if state.holders.contains_key(&execution.id) {
            return Ok(AdmissionDecision::Accepted);
        }

        let global_running = state.global.get(&key.action).copied().unwrap_or(0);
        let bucket = state.buckets.entry(key.clone()).or_default();
        bucket.prune_stale(now, self.stale_after);

        let position = match bucket.position_of(&execution.id) {
            Some(index) => {
                bucket.waiting[index].last_seen = now;
                index
            }
            None if bucket.waiting.len() >= self.max_waiting_per_bucket => {
                debug!("桶 {} 等待队列已满，执行实例 {} 稍后再试", key, execution.id);
                return Ok(AdmissionDecision::Deferred {
                    position: bucket.waiting.len() + 1,
                });
            }
            None => {
                bucket.waiting.push_back(Waiter {
                    execution_id: execution.id.clone(),
                    last_seen: now,
                });
                bucket.waiting.len() - 1
            }
        };

        let bucket_full = bucket_limit.is_some_and(|limit| bucket.running.len() >= limit as usize);
        let global_full = global_limit.is_some_and(|limit| global_running >= limit as usize);
        if position > 0 || bucket_full || global_full {
            return Ok(AdmissionDecision::Deferred {
                position: position + 1,
            });
        }

        bucket.waiting.pop_front();
        state.occupy(&execution.id, key);
        Ok(AdmissionDecision::Accepted)
    }

    /// 释放槽位，重复释放无副作用
    pub fn release(&self, execution_id: &str) -> Result<bool> {
        Ok(self.lock()?.vacate(execution_id))
    }

    /// 释放槽位并移出等待队列，用于执行实例结束
    pub fn forget(&self, execution_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.vacate(execution_id);
        for bucket in state.buckets.values_mut() {
            bucket.waiting.retain(|w| w.execution_id != execution_id);
        }
        Ok(())
    }

    /// 根据持久化的占用槽位的执行实例重建计数，不检查上限
    pub fn restore<'a, I>(&self, holders: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a Execution, &'a ActionDescriptor)>,
    {
        let mut state = self.lock()?;
        let mut restored = 0;
        for (execution, descriptor) in holders {
            if !execution.status.holds_slot() || state.holders.contains_key(&execution.id) {
                continue;
            }
            state.occupy(&execution.id, BucketKey::for_execution(execution, descriptor));
            restored += 1;
        }
        Ok(restored)
    }

    pub fn running_in(&self, key: &BucketKey) -> usize {
        self.lock()
            .map(|s| s.buckets.get(key).map_or(0, |b| b.running.len()))
            .unwrap_or(0)
    }

    pub fn waiting_in(&self, key: &BucketKey) -> usize {
        self.lock()
            .map(|s| s.buckets.get(key).map_or(0, |b| b.waiting.len()))
            .unwrap_or(0)
    }

    pub fn global_running(&self, action: &str) -> usize {
        self.lock()
            .map(|s| s.global.get(action).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_holding(&self, execution_id: &str) -> bool {
        self.lock()
            .map(|s| s.holders.contains_key(execution_id))
            .unwrap_or(false)
    }
}
