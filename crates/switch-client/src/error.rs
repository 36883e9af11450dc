//! Switch client errors

use thiserror::Error;

/// Errors that can occur when talking to a switch
#[derive(Debug, Error)]
pub enum SwitchClientError {
    /// HTTP transport error (timeout, TLS, unreachable)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The switch rejected a command
    #[error("Switch API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Credentials missing or rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request value outside the configured policy
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requested object is not configured on the switch
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SwitchClientError {
    /// Whether the failure happened before any device I/O
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, SwitchClientError::Validation(_))
    }
}
