//! Retry with exponential backoff for external gateway calls.
//!
//! Gateways retry transient failures themselves before reporting an error,
//! so a failed page in a synchronization run means the retries are spent.
//!
//! # Example
//!
//! ```rust
//! use iam_events_sync::error::GatewayError;
//! use iam_events_sync::retry::{RetryPolicy, retry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), GatewayError> {
//! let policy = RetryPolicy::new(3, Duration::from_millis(100))
//!     .with_max_delay(Duration::from_secs(5));
//!
//! let created = retry(&policy, "create_persons", || async { Ok::<_, GatewayError>(42) }).await?;
//! assert_eq!(created, 42);
//! # Ok(())
//! # }
//! ```

use crate::error::GatewayError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether repeating the operation may help.
pub trait Retryable: Display {
    /// Whether the operation should be attempted again.
    fn is_retryable(&self) -> bool;
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Exponential backoff configuration.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 200ms
/// - `max_delay`: 10 seconds
/// - `multiplier`: 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` retries starting at `initial_delay`.
    #[must_use]
    pub const fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.multiplier
            .checked_pow(retry)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Run `operation`, retrying retryable errors according to `policy`.
///
/// Returns the first success, the first non-retryable error, or the error of
/// the last attempt once retries are exhausted.
///
/// # Errors
///
/// Returns the operation's error as described above.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(operation, retries, "Gateway call succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) if retries >= policy.max_retries => {
                tracing::error!(
                    operation,
                    retries,
                    error = %error,
                    "Gateway call failed, retries exhausted"
                );
                return Err(error);
            },
            Err(error) => {
                let delay = policy.delay_for_retry(retries);
                tracing::warn!(
                    operation,
                    retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Gateway call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            },
        }
    }
}
