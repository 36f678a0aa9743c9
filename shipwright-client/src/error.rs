//! Error types for the Shipwright clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when calling an agent or the orchestrator
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Remote side answered with an error code and message
    #[error("Remote error (status {status}) {code}: {message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Error code reported by the remote side
        code: String,
        /// Error message reported by the remote side
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// A streamed response ended before its terminal frame
    #[error("Stream closed before completion: {0}")]
    StreamClosed(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create a remote error from status code, code and message
    pub fn remote(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote { status: 404, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Remote { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Remote { status, .. } if *status >= 500)
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Connection problems, timeouts, truncated streams and server errors are
    /// transient; rejected or undecodable requests are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(err) => !err.is_decode() && !err.is_builder(),
            Self::Remote { .. } => self.is_server_error(),
            Self::StreamClosed(_) => true,
            Self::ParseError(_) | Self::InvalidRequest(_) => false,
        }
    }
}
