//! Retry and backoff for toncenter requests
//!
//! Public toncenter endpoints rate-limit aggressively (1 rps without a key),
//! so transient failures are retried with exponential backoff before the
//! error is surfaced. Whatever still fails is left to the next scan cycle.

use eyre::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Request retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries, for tests and one-shot tools
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, rate limits, gateway errors; worth another attempt
    Transient,
    /// Bad request, unknown account, undecodable response
    Permanent,
}

/// Classify an HTTP status returned by toncenter
pub fn classify_status(status: reqwest::StatusCode) -> ErrorClass {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("ratelimit")
        || error_lower.contains("too many requests")
        || error_lower.contains("429")
        || error_lower.contains("502")
        || error_lower.contains("503")
        || error_lower.contains("504")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Permanent
}

/// Run `operation` until it succeeds, fails permanently or runs out of
/// retries. The closure receives the 0-indexed attempt number.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let error_str = format!("{:#}", e);
                if classify_error(&error_str) == ErrorClass::Permanent {
                    debug!(request = what, error = %error_str, "Permanent error, not retrying");
                    return Err(e);
                }
                if !config.should_retry(attempt) {
                    return Err(e);
                }

                let backoff = config.backoff_for_attempt(attempt);
                attempt += 1;
                warn!(
                    request = what,
                    attempt,
                    max = config.max_retries,
                    ?backoff,
                    error = %error_str,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
