//! Retry policy for page fetches
//!
//! A [`RetryPolicy`] is a plain value: an attempt limit plus a [`Backoff`] that maps
//! an attempt number to a delay. The fetcher receives one at construction, so tests
//! swap in [`NoBackoff`] and run without sleeping.
//!
//! # Example
//!
//! ```no_run
//! use catalog_harvest::retry::{IsRetryable, RetryPolicy};
//! use catalog_harvest::types::PageNumber;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "transient")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = RetryPolicy::immediate(3);
//! let value = policy
//!     .run(PageNumber(1), |_attempt| async { Ok::<_, MyError>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::types::PageNumber;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Network failures, bad statuses and truncated bodies are all transient
            // from the pipeline's point of view.
            FetchError::Transport(_) | FetchError::Status { .. } | FetchError::Decode { .. } => {
                true
            }
            // A well-formed JSON document with the wrong shape will not change on retry
            FetchError::MalformedPage(_) => false,
        }
    }
}

/// Delay schedule between attempts
pub trait Backoff: Send + Sync {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with optional jitter
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Build from the retry section of the configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()).max(0.0));
        if self.jitter {
            add_jitter(capped).min(self.max_delay)
        } else {
            capped
        }
    }
}

/// Retry immediately, with no delay
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Attempt limit plus backoff schedule
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy with a custom backoff
    ///
    /// `max_attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, backoff: Arc<dyn Backoff>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Exponential backoff policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Arc::new(ExponentialBackoff::from_config(config)),
        )
    }

    /// Policy that retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Arc::new(NoBackoff))
    }

    /// Total attempts allowed per page
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// The closure receives the 1-based attempt number. Each call must be
    /// independent; nothing is carried between attempts except the counter.
    pub async fn run<F, Fut, T, E>(&self, page: PageNumber, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: IsRetryable + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(page = page.0, attempts = attempt, "page succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(
                        page = page.0,
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "page attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(
                            page = page.0,
                            error = %e,
                            attempts = attempt,
                            "page failed after all attempts"
                        );
                    } else {
                        tracing::warn!(page = page.0, error = %e, "page failed with non-retryable error");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Add random jitter to a delay to avoid synchronized retries
///
/// The result lies between `delay` and `1.5 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.5);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
