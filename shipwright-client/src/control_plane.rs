//! Agent → orchestrator calls

use reqwest::Client;
use shipwright_core::domain::agent::Agent;
use shipwright_core::dto::agent::RegisterAgent;

use crate::error::{ClientError, Result};
use crate::handle_response;

/// HTTP client for the orchestrator, used by agents
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    client: Client,
}

impl ControlPlaneClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use shipwright_client::ControlPlaneClient;
    ///
    /// let client = ControlPlaneClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Agent Registration
    // =============================================================================

    /// Register (or re-register) this agent
    ///
    /// Registration is idempotent: a known agent id gets its address updated
    /// and is marked idle again.
    ///
    /// # Example
    /// ```no_run
    /// # use shipwright_client::ControlPlaneClient;
    /// # use shipwright_core::dto::agent::RegisterAgent;
    /// # async fn example() -> Result<(), shipwright_client::ClientError> {
    /// let client = ControlPlaneClient::new("http://localhost:8080");
    /// let agent = client.register_agent(&RegisterAgent {
    ///     agent_id: "agent-001".to_string(),
    ///     host: "10.0.0.4".to_string(),
    ///     port: 9090,
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn register_agent(&self, request: &RegisterAgent) -> Result<Agent> {
        let url = format!("{}/agents/register", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Channel
    // =============================================================================

    /// Websocket URL of this agent's health-check channel
    pub fn channel_url(&self, agent_id: &str) -> Result<String> {
        let rest = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ClientError::InvalidRequest(format!(
                "Unsupported orchestrator URL scheme: {}",
                self.base_url
            )));
        };

        Ok(format!("{}/agents/{}/channel", rest, agent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_swaps_scheme() {
        let client = ControlPlaneClient::new("http://localhost:8080/");
        assert_eq!(
            client.channel_url("agent-1").unwrap(),
            "ws://localhost:8080/agents/agent-1/channel"
        );

        let client = ControlPlaneClient::new("https://cp.example.com");
        assert_eq!(
            client.channel_url("a").unwrap(),
            "wss://cp.example.com/agents/a/channel"
        );
    }

    #[test]
    fn test_channel_url_rejects_unknown_scheme() {
        let client = ControlPlaneClient::new("ftp://nope");
        assert!(matches!(
            client.channel_url("a"),
            Err(ClientError::InvalidRequest(_))
        ));
    }
}
