//! One-shot agent operations: pull requests, cleanup, health

use shipwright_core::dto::agent::AgentHealth;
use shipwright_core::dto::pr::{CreatePrRequest, CreatePrResponse};
use shipwright_core::dto::workspace::{CleanupReport, CleanupRequest};

use crate::error::Result;
use crate::{AgentClient, handle_response};

impl AgentClient {
    // =============================================================================
    // Pull Requests
    // =============================================================================

    /// Commit, push and open a pull request for one repository of a job
    ///
    /// # Returns
    /// The URL of the created pull request
    pub async fn create_pr(&self, request: &CreatePrRequest) -> Result<CreatePrResponse> {
        let url = format!("{}/pr", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Workspace
    // =============================================================================

    /// Tear down everything the job left on the agent
    ///
    /// The agent always answers with a report; individual cleanup failures are
    /// listed in it rather than returned as errors.
    pub async fn cleanup_workspace(&self, request: &CleanupRequest) -> Result<CleanupReport> {
        let url = format!("{}/workspace/cleanup", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Health
    // =============================================================================

    /// Check that the agent's RPC server is reachable
    pub async fn health(&self) -> Result<AgentHealth> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }
}
