//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for loop operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failure reported by a model transport.
///
/// Retries, if any, belong to the transport layer; the loop surfaces these
/// to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network or client-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider unavailable or overloaded
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unexpected status code
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Unavailable(_) | Self::RateLimited(_)
        )
    }
}

/// Loop-level error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// The model call failed; the run was aborted
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The run was cancelled externally
    #[error("Run cancelled during iteration {iteration}")]
    Cancelled { iteration: usize },

    /// An iteration exceeded the configured time limit
    #[error("Iteration {iteration} timed out after {limit:?}")]
    Timeout { iteration: usize, limit: Duration },

    /// The run was started with invalid arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// True for explicit cancellation and per-iteration timeouts.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(TransportError::RateLimited(_)) => {
                "The model service is rate limiting requests. Please wait a moment.".into()
            }
            Self::Transport(TransportError::Auth(_)) => {
                "Authentication with the model service failed.".into()
            }
            Self::Transport(e) => format!("The model service encountered an error: {e}"),
            Self::Cancelled { .. } => "The request was cancelled.".into(),
            Self::Timeout { .. } => "The request took too long to process.".into(),
            Self::InvalidInput(msg) => format!("Invalid request: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
