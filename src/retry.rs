//! Bounded retry with exponential backoff.
//!
//! Two policies are used by the indexing engine: a heavier one around
//! embedding calls (3 attempts from 2 s by default) and a lighter one
//! around store writes (2 attempts from 500 ms). Both come from the
//! `[retry]` config section.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn embed(config: &RetryConfig) -> Self {
        Self {
            attempts: config.embed_attempts.max(1),
            initial_delay: Duration::from_millis(config.embed_initial_delay_ms),
        }
    }

    pub fn store(config: &RetryConfig) -> Self {
        Self {
            attempts: config.store_attempts.max(1),
            initial_delay: Duration::from_millis(config.store_initial_delay_ms),
        }
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16))
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Each failure except the last is logged at `warn` with `what` as the
/// operation label. The last error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = what,
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
