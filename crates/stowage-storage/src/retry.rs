//! Bounded retry with exponential backoff, shared by every adapter.

use std::future::Future;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// After failed attempt `k` (1-based, `k < max_attempts`) the caller waits
/// `base_delay * 2^k`: 2s then 4s with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Same attempt count, no waiting.
    pub fn immediate() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. Exhaustion wraps the last error.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(
                        operation = name,
                        attempt,
                        error = %e,
                        "Storage operation failed with a non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Storage operation failed"
                    );

                    if attempt >= self.max_attempts {
                        tracing::error!(
                            operation = name,
                            attempts = self.max_attempts,
                            "Storage operation failed after all attempts"
                        );
                        return Err(StorageError::RetriesExhausted {
                            operation: name.to_string(),
                            attempts: self.max_attempts,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.delay_after(attempt);
                    tracing::info!(
                        operation = name,
                        delay_secs = delay.as_secs_f64(),
                        "Retrying storage operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
