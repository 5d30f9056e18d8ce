//! Error types for the synchronization core

use thiserror::Error;

/// Core-wide error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    /// No credential configured. Permanent, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout, connection failure, non-success status (rate limiting included)
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Upstream payload did not match the expected schema
    #[error("Upstream schema error ({source_name}): {message}")]
    UpstreamSchema { source_name: String, message: String },

    /// Every source in a fallback chain failed
    #[error("All sources failed: {0}")]
    SourcesExhausted(String),
}

impl MarketError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        MarketError::Configuration(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        MarketError::TransientNetwork(msg.into())
    }

    pub fn schema(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        MarketError::UpstreamSchema {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        MarketError::SourcesExhausted(msg.into())
    }

    /// Whether a retry at a later time could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::TransientNetwork(_))
    }

    /// Stable key used to collapse repeated identical errors in logs
    pub fn log_key(&self) -> String {
        match self {
            MarketError::Configuration(_) => "configuration".to_string(),
            MarketError::TransientNetwork(msg) => format!("network:{}", msg),
            MarketError::UpstreamSchema { source_name, .. } => format!("schema:{}", source_name),
            MarketError::SourcesExhausted(_) => "exhausted".to_string(),
        }
    }
}

/// Result type alias for core operations
pub type MarketResult<T> = Result<T, MarketError>;
