use snapsync_config::shared::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{SyncError, SyncResult};

/// Executes fallible async operations with deterministic exponential backoff.
///
/// After the failed zero-based attempt `n` (unless it was the last one) the policy sleeps
/// `backoff_factor^n` seconds. The error of the final attempt is returned as is.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Creates a policy. A `max_attempts` of zero still runs the operation once.
    pub fn new(max_attempts: u32, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_factor,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_factor)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failed zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self
            .backoff_factor
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Runs `operation`, retrying every failure.
    pub async fn run<T, F, Fut>(&self, operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        self.run_if(operation, |_| true).await
    }

    /// Runs `operation`, retrying only the failures accepted by `should_retry`.
    pub async fn run_if<T, F, Fut, P>(&self, mut operation: F, should_retry: P) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
        P: Fn(&SyncError) -> bool,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let is_last_attempt = attempt + 1 >= self.max_attempts;
            if is_last_attempt || !should_retry(&err) {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "retry {}/{} after {:.1}s",
                attempt + 1,
                self.max_attempts,
                delay.as_secs_f64(),
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
