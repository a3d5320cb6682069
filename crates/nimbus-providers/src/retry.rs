//! Retry policy for provider HTTP calls with exponential backoff.
//!
//! Retries transient network failures:
//! - Timeouts
//! - Connection resets
//! - 5xx server errors
//! - 429 rate limiting
//!
//! Does NOT retry:
//! - 4xx client errors
//! - Authentication failures (401, 403)
//! - Undecodable payloads

use reqwest::StatusCode;
use std::time::Duration;

use crate::client::ErrorKind;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: initial_delay * 2^attempt
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

/// Classify a reqwest transport error into an [`ErrorKind`] and a retry
/// decision.
pub fn classify_request_error(error: &reqwest::Error) -> (ErrorKind, RetryDecision) {
    if error.is_timeout() {
        tracing::debug!("Request timed out, will retry");
        return (ErrorKind::Timeout, RetryDecision::Retry);
    }

    if error.is_connect() {
        tracing::debug!("Connection error, will retry");
        return (ErrorKind::Timeout, RetryDecision::Retry);
    }

    if let Some(status) = error.status() {
        return classify_status(status);
    }

    (
        ErrorKind::InvalidResponse(error.to_string()),
        RetryDecision::NoRetry,
    )
}

/// Classify an HTTP status into an [`ErrorKind`] and a retry decision.
pub fn classify_status(status: StatusCode) -> (ErrorKind, RetryDecision) {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::debug!("Auth rejected ({}), not retryable", status);
        return (ErrorKind::AuthError, RetryDecision::NoRetry);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::debug!("Rate limited (429), will retry");
        return (ErrorKind::RateLimited, RetryDecision::Retry);
    }

    if status == StatusCode::REQUEST_TIMEOUT {
        tracing::debug!("Request timeout (408), will retry");
        return (ErrorKind::Timeout, RetryDecision::Retry);
    }

    if status.is_server_error() {
        tracing::debug!("Server error ({}), will retry", status);
        return (
            ErrorKind::InvalidResponse(format!("server error {status}")),
            RetryDecision::Retry,
        );
    }

    (
        ErrorKind::InvalidResponse(format!("unexpected status {status}")),
        RetryDecision::NoRetry,
    )
}
