//! Shipwright HTTP Clients
//!
//! Type-safe clients for the two directions of Shipwright traffic:
//!
//! - [`AgentClient`]: control plane → agent. Runs steps (streamed), creates
//!   pull requests, cleans up workspaces and checks health.
//! - [`ControlPlaneClient`]: agent → control plane. Registration and the
//!   address of the bidirectional health-check channel.
//!
//! # Example
//!
//! ```no_run
//! use shipwright_client::AgentClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shipwright_client::ClientError> {
//!     let client = AgentClient::new("http://localhost:9090");
//!     let health = client.health().await?;
//!     println!("agent {} running {} step(s)", health.agent_id, health.busy_steps);
//!     Ok(())
//! }
//! ```

mod control_plane;
pub mod error;
mod steps;
mod workspace;

// Re-export commonly used types
pub use control_plane::ControlPlaneClient;
pub use error::{ClientError, Result};
pub use steps::{FrameDecoder, StepStream};

use reqwest::Client;
use serde::de::DeserializeOwned;
use shipwright_core::dto::error::RemoteError;

/// HTTP client for one agent's RPC surface
///
/// Methods are organized into logical groups:
/// - Step execution (streamed log events + final report)
/// - One-shot operations (pull request creation, workspace cleanup)
/// - Health
#[derive(Debug, Clone)]
pub struct AgentClient {
    /// Base URL of the agent (e.g., "http://10.0.0.4:9090")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl AgentClient {
    /// Create a new agent client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the agent RPC server
    ///
    /// # Example
    /// ```
    /// use shipwright_client::AgentClient;
    ///
    /// let client = AgentClient::new("http://localhost:9090");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new agent client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    /// Step streams can run for a long time, so a whole-request timeout should
    /// not be set on clients used for `run_step`.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the agent
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Check the status code and turn an error body into [`ClientError::Remote`].
///
/// Error bodies are expected to be `{"code": ..., "message": ...}`; anything
/// else is reported verbatim with an `http_error` code.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    let err = match serde_json::from_str::<RemoteError>(&body) {
        Ok(remote) => ClientError::remote(status.as_u16(), remote.code, remote.message),
        Err(_) => ClientError::remote(status.as_u16(), "http_error", body),
    };

    Err(err)
}

/// Handle an API response and deserialize JSON
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = AgentClient::new("http://localhost:9090");
        assert_eq!(client.base_url(), "http://localhost:9090");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = AgentClient::new("http://localhost:9090/");
        assert_eq!(client.base_url(), "http://localhost:9090");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = AgentClient::with_client("http://localhost:9090", http_client);
        assert_eq!(client.base_url(), "http://localhost:9090");
    }
}
