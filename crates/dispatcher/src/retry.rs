//! 重试退避计算
//!
//! 第 `n` 次重试的名义间隔为 `base * multiplier^(n-1)`，不超过最大间隔。
//! 抖动只向上叠加，比例不超过 `multiplier - 1`，因此相邻两次重试的间隔
//! 不会减小。

use std::time::Duration;

use automator_core::{
    ActionDescriptor, ActionFailure, Execution, FailureKind, RetryPolicy,
};

/// 重试决策
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 等待后重新进入准入控制
    Retry { delay: Duration },
    /// 以指定的失败类型结束
    Fail(FailureKind),
}

/// 计算第 `retry` 次重试（从1开始）的退避间隔
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    backoff_delay_with_sample(policy, retry, rand::random::<f64>())
}

/// 使用给定的 `[0, 1)` 随机样本计算退避间隔
pub fn backoff_delay_with_sample(policy: &RetryPolicy, retry: u32, sample: f64) -> Duration {
    let exponent = retry.saturating_sub(1).min(63) as i32;
    let max = policy.max_delay_ms as f64;
    let nominal = (policy.base_delay_ms as f64 * policy.multiplier.powi(exponent)).min(max);

    let jitter_ratio = policy.jitter_factor.min(policy.multiplier - 1.0).max(0.0);
    let jitter = nominal * jitter_ratio * sample.clamp(0.0, 1.0);
    let delay = (nominal + jitter).min(max);

    Duration::from_millis(delay.round() as u64)
}

/// 根据动作返回的失败决定下一步
pub fn decide(
    descriptor: &ActionDescriptor,
    execution: &Execution,
    failure: &ActionFailure,
) -> RetryDecision {
    if !descriptor.is_retryable(failure) {
        return RetryDecision::Fail(FailureKind::Permanent);
    }
    if execution.retries_exhausted() {
        return RetryDecision::Fail(FailureKind::RetriesExhausted);
    }
    RetryDecision::Retry {
        delay: backoff_delay(&descriptor.retry, execution.attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay_with_sample(&policy, 1, 0.0), Duration::from_secs(10));
        assert_eq!(backoff_delay_with_sample(&policy, 2, 0.0), Duration::from_secs(20));
        assert_eq!(backoff_delay_with_sample(&policy, 3, 0.0), Duration::from_secs(40));
        assert_eq!(backoff_delay_with_sample(&policy, 4, 0.0), Duration::from_secs(60));
        assert_eq!(backoff_delay_with_sample(&policy, 9, 0.99), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_adds_up_to_factor() {
        let policy = RetryPolicy::default();
        let delay = backoff_delay_with_sample(&policy, 1, 1.0);
        assert_eq!(delay, Duration::from_millis(12_500));
    }

    #[test]
    fn test_backoff_non_decreasing() {
        let policies = [
            RetryPolicy::default(),
            RetryPolicy {
                max_attempts: 10,
                base_delay_ms: 100,
                max_delay_ms: 5_000,
                multiplier: 1.1,
                jitter_factor: 1.0,
            },
        ];
        let samples = [0.0, 0.3, 0.7, 0.999];
        for policy in &policies {
            let mut previous_max = Duration::ZERO;
            for retry in 1..=12 {
                let delays: Vec<Duration> = samples
                    .iter()
                    .map(|s| backoff_delay_with_sample(policy, retry, *s))
                    .collect();
                let min = *delays.iter().min().unwrap();
                let max = *delays.iter().max().unwrap();
                assert!(min >= previous_max, "retry {retry}: {min:?} < {previous_max:?}");
                assert!(max <= Duration::from_millis(policy.max_delay_ms));
                previous_max = max;
            }
        }
    }
}
