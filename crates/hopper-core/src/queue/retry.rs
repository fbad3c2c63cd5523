//! Retry policy for store calls: bounded attempts with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::StoreError;

/// How often, and how patiently, a store call is retried.
///
/// Only transient store failures are retried. The delay before retry `n`
/// (1-indexed) is `backoff * multiplier^(n - 1)`, plus up to 25% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub backoff: Duration,

    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            multiplier: 2.0,
        }
    }

    /// A single try, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `attempts` (1-indexed), without jitter.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.backoff.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }

    fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.next_delay(attempts);
        let jitter_cap = delay.as_millis() as u64 / 4;
        if jitter_cap == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy gives up.
///
/// `operation` is re-invoked from scratch on every try, so it must be safe to
/// repeat. Store operations are, through their identity and state predicates.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    name: &'static str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempts < policy.max_attempts => {
                let delay = policy.jittered_delay(attempts);
                warn!(
                    operation = name,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "store call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
