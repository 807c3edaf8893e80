//! Retry with exponential backoff for transient request failures.

use std::future::Future;
use std::time::Duration;

use crate::error::FetchError;

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// How often and how patiently a failed request is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of repetitions after the first attempt.
    pub retries: u32,
    /// Delay before the first repetition. Doubles with every further repetition.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Final error of a retried operation together with the number of attempts made.
#[derive(Debug, Clone)]
pub struct RetryError {
    /// Error of the last attempt.
    pub error: FetchError,
    /// Number of attempts made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never repeats a request.
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Maximum number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before attempt number `attempt` (1-based). The first attempt is never delayed.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.backoff
            .checked_mul(1 << exponent)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Runs `operation` until it succeeds, fails permanently or the attempts run out.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts() => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    log::debug!("Attempt {attempt} after {delay:?}: {error}");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => {
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}
