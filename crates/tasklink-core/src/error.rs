//! Error types for Tasklink connection handling.
//!
//! Only the failures of [`ConnectionService::execute`] reach application code.
//! Probe failures are classified inside the health probe and never surface here.
//!
//! [`ConnectionService::execute`]: crate::network::ConnectionService::execute

use std::time::Duration;
use thiserror::Error;

/// Boxed error carried as the last underlying failure of a retry sequence.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the Tasklink library.
#[derive(Debug, Error)]
pub enum ConnectionError {
    // Single-attempt failures
    #[error("Network error: {message}")]
    TransientNetwork {
        message: String,
        /// HTTP status code, when the server answered at all.
        status: Option<u16>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Failures surfaced by execute
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: BoxError,
    },

    #[error("Operation failed on attempt {attempt} with a non-retryable error: {source}")]
    NotRetryable {
        attempt: u32,
        #[source]
        source: BoxError,
    },

    #[error("Network is offline")]
    Offline,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for Tasklink operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        ConnectionError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ConnectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectionError::Timeout(Duration::ZERO)
        } else {
            ConnectionError::TransientNetwork {
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

impl ConnectionError {
    /// Shorthand for a transport-level failure with no HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        ConnectionError::TransientNetwork {
            message: message.into(),
            status: None,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::TransientNetwork { .. } | ConnectionError::Timeout(_)
        )
    }

    /// True when every attempt of a retry sequence failed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ConnectionError::RetryExhausted { .. })
    }

    /// True when the call was rejected because the device is offline.
    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectionError::Offline)
    }
}
