//! Centralized error types for the orchestration core.
//!
//! Provider-level failures (timeouts, rate limits, bad payloads) never
//! escape the orchestrator; the only caller-visible failure is
//! `FetchError::NoUsableData`. Everything here carries a `user_message()`
//! suitable for display by the rendering collaborator.

use thiserror::Error;

/// Errors surfaced by the orchestration API.
///
/// `Clone` because a single coalesced fetch cycle fans its outcome out to
/// every concurrent waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Every requested capability failed on every configured provider and
    /// no cache entry within max_age existed to fall back on.
    #[error("no usable weather data for {location}")]
    NoUsableData { location: String },

    /// The request named a provider that is not configured (e.g. a pinned
    /// provider missing its API key).
    #[error("provider {provider} is not configured")]
    ProviderUnavailable { provider: String },

    /// The request asked for nothing.
    #[error("request contained no capabilities")]
    EmptyRequest,

    /// Cache persistence failed in a way that also broke the read path.
    #[error("cache failure: {0}")]
    Cache(String),
}

impl FetchError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::NoUsableData { .. } => {
                "Weather data is currently unavailable. Please try again later."
            }
            FetchError::ProviderUnavailable { .. } => {
                "The selected weather source is not available. Check your settings."
            }
            FetchError::EmptyRequest => "Nothing to fetch. Check your settings.",
            FetchError::Cache(_) => "Local weather storage failed. Try restarting the app.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_user_messages() {
        let err = FetchError::NoUsableData { location: "seattle".into() };
        assert!(err.user_message().contains("unavailable"));

        let err = FetchError::ProviderUnavailable { provider: "timeline".into() };
        assert!(err.user_message().contains("source"));
    }

    #[test]
    fn test_fetch_error_clones_equal() {
        let err = FetchError::NoUsableData { location: "x".into() };
        assert_eq!(err.clone(), err);
    }
}
