//! Bounded exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{DeployError, Result};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default upper bound of a single delay.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry policy for remote calls.
///
/// Only errors reporting [`is_retryable`](crate::StackforgeError::is_retryable)
/// are retried; everything else is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry.
    base_delay: Duration,
    /// Upper bound of a single delay.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Creates a policy that retries without waiting.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), ignoring error hints.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `operation`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or
    /// [`DeployError::RetriesExhausted`] once every attempt failed
    /// transiently.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{operation} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    if attempt >= self.max_attempts {
                        return Err(DeployError::RetriesExhausted {
                            attempts: attempt,
                            operation: operation.to_string(),
                            last_error: err.to_string(),
                        }
                        .into());
                    }

                    let hint = err
                        .retry_delay_secs()
                        .map_or(Duration::ZERO, Duration::from_secs)
                        .min(self.max_delay);
                    let delay = self.backoff(attempt).max(hint);
                    warn!(
                        "{err}; retrying {operation} in {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
