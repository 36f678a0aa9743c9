//! Agent domain model
//!
//! Represents a remote executor that runs job steps for the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote step executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier for the agent
    pub id: String,

    /// Host the agent's RPC server is reachable on
    pub host: String,

    /// Port of the agent's RPC server
    pub port: u16,

    /// Current status of the agent
    pub status: AgentStatus,

    /// Last time any activity was observed on the agent's channel
    pub last_active: DateTime<Utc>,

    /// Failed liveness checks since the last successful one
    pub consecutive_failures: i32,

    /// When this agent was first registered
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Base URL of the agent's RPC server
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is executing a job
    Active,

    /// Agent is connected and waiting for work
    Idle,

    /// Agent failed a liveness check; scheduling to it is paused
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
