use super::RetryPolicy;
use crate::error::FlareError;
use std::time::Duration;

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    retry_all: bool,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            retry_all: false,
        }
    }

    /// 不限次数、对任何错误都重试，只能通过取消结束
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: usize::MAX,
            base_delay,
            max_delay,
            retry_all: true,
        }
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(10))
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &FlareError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        // 只对可重试的错误进行重试
        self.retry_all || error.is_retryable()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay_ms = self.base_delay.as_millis() as u64 * (1 << attempt.min(10));
        let delay = Duration::from_millis(delay_ms);
        delay.min(self.max_delay)
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}
