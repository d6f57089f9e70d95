//! Bounded retry for status synchronisation.
//!
//! A run's snapshot store may be briefly unreadable while the job is
//! closing it, and a remote host may drop a poll. Both are retried a fixed
//! number of times with a growing pause before the failure is reported to
//! the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Base pause, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Set retry count
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base pause
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Run `op` until it succeeds or the retries are used up
///
/// # Errors
///
/// Returns the last error once every attempt has failed
pub async fn retry_with_backoff<T, E, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => {
                error!(what, attempts = attempt + 1, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

/// Async counterpart of [`retry_with_backoff`], for gateway calls
///
/// # Errors
///
/// Returns the last error once every attempt has failed
pub async fn retry_async<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => {
                error!(what, attempts = attempt + 1, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}
