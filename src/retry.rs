//! Retry logic with configurable backoff
//!
//! Used for the bounded retries the pipeline allows: browser start and the
//! initial queue connection. Every other failure is terminal for its job.
//!
//! # Example
//!
//! ```no_run
//! use nfe_harvester::retry::{IsRetryable, retry_with_backoff};
//! use nfe_harvester::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
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
//! let config = RetryConfig::default();
//! retry_with_backoff(&config, |_attempt| async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{BackoffStrategy, RetryConfig};
use crate::error::{AutomationError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Redis(e) => {
                e.is_connection_refusal()
                    || e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_io_error()
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Only a failed browser start is worth another attempt; everything
            // else the remote system reports is final for the job
            Error::Automation(e) => matches!(
                e,
                AutomationError::BrowserStart { .. } | AutomationError::Driver(_)
            ),
            Error::Queue(_) => true,
            Error::Config { .. }
            | Error::Validation(_)
            | Error::NoInvoices(_)
            | Error::Ingest(_)
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::NotFound(_)
            | Error::Serialization(_)
            | Error::Yaml(_)
            | Error::ApiServerError(_)
            | Error::Other(_) => false,
        }
    }
}

/// Delay to wait after the `failures`-th failed attempt (1-based)
pub fn delay_for_attempt(config: &RetryConfig, failures: u32) -> Duration {
    let failures = failures.max(1);
    let base = match config.strategy {
        BackoffStrategy::Fixed => config.initial_delay,
        BackoffStrategy::Linear => config.initial_delay.saturating_mul(failures),
        BackoffStrategy::Exponential => {
            let factor = config.backoff_multiplier.powi(failures as i32 - 1);
            Duration::from_secs_f64(config.initial_delay.as_secs_f64() * factor)
        }
    };
    let capped = base.min(config.max_delay);

    if config.jitter {
        add_jitter(capped)
    } else {
        capped
    }
}

/// Run an async operation until it succeeds, fails permanently, or runs out of attempts
///
/// The closure receives the 1-based attempt number. Returns the successful
/// result or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = delay_for_attempt(config, attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter of up to 100% of the delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
