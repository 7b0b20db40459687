//! 重试策略模块

pub mod exponential;

pub use exponential::ExponentialBackoffPolicy;

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{FlareError, Result};

/// 重试策略 trait
pub trait RetryPolicy {
    fn should_retry(&self, attempt: usize, error: &FlareError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}

/// 按策略重试异步操作，直到成功、策略放弃或被取消
///
/// 被取消时返回最后一次的错误。
pub async fn retry_with<P, F, Fut, T>(
    policy: &P,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        attempt += 1;
        if !policy.should_retry(attempt, &error) {
            return Err(error);
        }

        let delay = policy.backoff_duration(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying operation");
        tokio::select! {
            _ = cancel.cancelled() => return Err(error),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
