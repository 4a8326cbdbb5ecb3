//! Retry policy with exponential backoff
//!
//! Used for per-unit acquisition retries and for the playlist-resolution and
//! generator calls made during expansion.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay before the next attempt, after `failed_attempts` failures.
    /// Doubles from `initial_backoff` and never exceeds `max_backoff`.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }

    /// True while another attempt is allowed
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(60))
    }
}

/// Final failure of a retried call
#[derive(Debug)]
pub enum CallFailure<E> {
    /// Last attempt hit the per-call timeout
    TimedOut(Duration),
    /// Last attempt returned an error
    Failed(E),
}

/// Run `operation` with a per-attempt timeout, retrying errors and timeouts
/// according to `policy`.
pub async fn call_with_retry<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut operation: F,
) -> Result<T, CallFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(operation = operation_name, attempt, error = %e, "Call failed");
                CallFailure::Failed(e)
            }
            Err(_) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    timeout_secs = timeout.as_secs(),
                    "Call timed out"
                );
                CallFailure::TimedOut(timeout)
            }
        };

        if !policy.allows_retry(attempt) {
            return Err(failure);
        }

        let delay = policy.delay_for(attempt);
        debug!(operation = operation_name, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
    }
}
