use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff with jitter.
///
/// `max-retries: 0` (the default) issues each request exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max) + jitter(0..base)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms > 0 {
            rand::rng().random_range(0..base_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, the classifier aborts, or retries run out.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                attempt += 1;
                if attempt >= total_attempts || classifier(&err) == RetryAction::Abort {
                    return Err(err);
                }
                let delay = config.delay_for_retry(attempt - 1);
                tracing::warn!(
                    attempt,
                    total_attempts,
                    delay = %humantime::format_duration(delay),
                    "retryable error: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
