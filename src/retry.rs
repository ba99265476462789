//! Per-range retry with exponential backoff
//!
//! Every byte range gets its own budget: a transient failure re-requests that
//! range only, never the whole object. Delays double (by default) from
//! `initial_delay` up to `max_delay`, with optional jitter so parallel ranges
//! do not retry in lockstep.

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// Returns true if the operation may succeed when repeated
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
            }
            // Throttling and server-side faults
            FetchError::Status { status, .. } => {
                matches!(*status, 408 | 429 | 500..=599)
            }
            // Truncated range body
            FetchError::ShortRead { .. } => true,
            FetchError::InvalidContentRange { .. } => false,
            FetchError::Cancelled | FetchError::TimedOut { .. } => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch(e) => e.is_retryable(),
            Error::Config { .. } | Error::Storage(_) | Error::Extraction(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or has been retried
/// `config.max_attempts` times. The last error is returned unchanged.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut retries = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::debug!(retries, "range recovered after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            tracing::debug!(error = %error, "permanent failure, not retrying");
            return Err(error);
        }
        if retries >= config.max_attempts {
            tracing::error!(error = %error, retries, "retry budget exhausted");
            return Err(error);
        }

        retries += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %error,
            retry = retries,
            max_retries = config.max_attempts,
            wait_ms = wait.as_millis() as u64,
            "transient failure, retrying"
        );
        tokio::time::sleep(wait).await;

        delay = delay.mul_f64(config.backoff_multiplier).min(config.max_delay);
    }
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
