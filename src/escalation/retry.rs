//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that doubles `initial_delay` on every retry, capped at `max_delay`.
    pub const fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, returns an error `should_retry` rejects,
    /// or the retry budget is spent. Returns the last error and the attempt count.
    pub async fn run<F, Fut, T, E, R>(&self, mut op: F, should_retry: R) -> Result<T, (E, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if !should_retry(&e) || attempt > self.max_retries {
                        return Err((e, attempt));
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
