//! Agent DTOs
//!
//! Data transfer objects for agent registration and health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to register an agent with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    /// Unique identifier for the agent
    pub agent_id: String,

    /// Host the orchestrator should use to reach the agent
    pub host: String,

    /// Port of the agent's RPC server
    pub port: u16,
}

/// Health report returned by an agent's `/health` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,

    /// Steps currently executing on the agent
    pub busy_steps: usize,

    pub timestamp: DateTime<Utc>,
}
