// HLS Retry Utility: bounded retry with linear backoff, honouring pause and cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::hls::control::JobControl;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// The n-th retry waits `base_delay * n`.
    pub base_delay: Duration,
    /// Hard cap on a single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        self.base_delay
            .checked_mul(retry)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    Exhausted { attempts: u32, last: E },
}

/// Run `operation` until it succeeds, the policy is exhausted, or the job is cancelled.
///
/// The closure receives the 1-indexed attempt number. The pause gate is awaited
/// before every attempt and every backoff sleep, so a paused job starts no new
/// attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    control: &JobControl,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        control.gate().await.map_err(|_| RetryError::Cancelled)?;
        attempt += 1;

        let err = match control.guard(operation(attempt)).await {
            Err(_) => return Err(RetryError::Cancelled),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
        };

        if attempt >= policy.total_attempts() {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after error"
        );
        control.gate().await.map_err(|_| RetryError::Cancelled)?;
        control
            .sleep(delay)
            .await
            .map_err(|_| RetryError::Cancelled)?;
    }
}
