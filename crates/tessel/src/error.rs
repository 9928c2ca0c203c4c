//! Error types.
//!
//! Provider failures are classified once, at the adapter boundary, so retry
//! and fallback decisions never depend on string matching. Tool failures are
//! not errors in this sense: they travel back to the model as
//! [`ToolResult`](crate::ToolResult)s with `is_error` set.

use thiserror::Error;

/// Failure talking to a language-model backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-success HTTP status with the response body.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (DNS, reset, refused).
    #[error("network error: {0}")]
    Network(String),

    /// The request or stream did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The backend answered with something we could not parse.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// No credentials were configured.
    #[error("missing API key: {0}")]
    MissingCredentials(String),
}

impl ProviderError {
    /// Transient failures worth a bounded retry: rate limits, 5xx, network
    /// hiccups and timeouts. Client errors are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
            }
            ProviderError::Network(_) | ProviderError::Timeout(_) => true,
            ProviderError::Malformed(_) | ProviderError::MissingCredentials(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Top-level error for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted approvals could not be read or written.
    #[error("approval store error: {0}")]
    ApprovalStore(String),

    /// Checkpoint files were missing, unreadable or of an unknown version.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("configuration error: {0}")]
    Config(String),
}
