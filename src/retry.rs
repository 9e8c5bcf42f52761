//! Exponential-backoff retry for fallible async operations.
//!
//! The wrapper is generic over the operation and its error; callers supply a
//! predicate deciding which errors are worth retrying. Transient transport
//! failures are; credential failures, validation failures and other client
//! errors are not, since retrying them is wasted work and can trip the
//! backend's rate limits.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::backend::BackendError;

/// Backoff parameters for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry: `base * factor^(attempt-1)`, capped at
    /// `max_delay`. `attempt` is 1-based (the first failed attempt is 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op`, retrying while `retry_condition` holds and attempts remain.
/// Returns the first success or the last error.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    retry_condition: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && retry_condition(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "attempt {attempt}/{} failed ({e}), retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Retry specialization for backend queries: retries the backend's transient
/// error class (connection loss, timeouts, 5xx) and nothing else.
pub async fn retry_backend<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    retry_with_backoff(policy, BackendError::is_transient, op).await
}
