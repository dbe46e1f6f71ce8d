//! Bounded exponential-backoff retry policy.
//!
//! The policy is independent of the transport: callers pass the operation and
//! a predicate telling terminal failures apart from retryable ones.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sleeps between attempts. Swappable so backoff can be observed in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry `k` (1-based): `min(base * 2^(k-1), max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 2f64.powi(exponent as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Errors for which `is_retryable` is false are returned immediately.
    /// After the last attempt the last error is returned.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        sleeper: &dyn Sleeper,
        is_retryable: P,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!("Giving up after {} attempts: {}", attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "Attempt failed, retrying: {}",
                        e
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
