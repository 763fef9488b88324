use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

use crate::config::RetrySection;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    cap_backoff: Duration,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: BrowserError,
    },
    #[error(transparent)]
    SessionExpired(BrowserError),
}

impl RetryPolicy {
    pub fn new(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            cap_backoff: Duration::from_secs(config.cap_backoff_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay slept before the 1-based `attempt`. Grows by one second per
    /// attempt from the base and never exceeds the cap.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let step = Duration::from_secs((attempt - 2) as u64);
        (self.base_backoff + step).min(self.cap_backoff)
    }
}

/// Runs `operation` until it succeeds, the policy runs out of attempts, or it
/// reports an expired session. The closure receives the 1-based attempt.
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut run: F,
) -> Result<RetryOutcome<T>, RetryError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = BrowserResult<T>>,
{
    let mut attempt = 1usize;
    loop {
        let result = match timeout(policy.timeout, run(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout(format!(
                "{operation} ({}s)",
                policy.timeout.as_secs()
            ))),
        };

        let err = match result {
            Ok(result) => {
                return Ok(RetryOutcome {
                    result,
                    attempts: attempt,
                })
            }
            Err(err) if err.is_session_expiry() => return Err(RetryError::SessionExpired(err)),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            error!(
                operation,
                attempts = attempt,
                error = %err,
                "operation failed, giving up"
            );
            return Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts: attempt,
                source: err,
            });
        }

        let delay = policy.delay_for_attempt(attempt + 1);
        warn!(
            operation,
            attempt,
            next_attempt = attempt + 1,
            delay_secs = delay.as_secs(),
            error = %err,
            "operation failed, retrying"
        );
        if !delay.is_zero() {
            sleep(delay).await;
        }
        attempt += 1;
    }
}
