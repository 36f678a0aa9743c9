//! Agent Service
//!
//! Registration of remote step executors.

use shipwright_core::domain::agent::Agent;
use shipwright_core::dto::agent::RegisterAgent;
use sqlx::PgPool;

use crate::repository::agent_repository;

/// Service error type
#[derive(Debug)]
pub enum AgentError {
    NotFound(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for AgentError {
    fn from(err: sqlx::Error) -> Self {
        AgentError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Register an agent with the orchestrator
///
/// Creates the agent or refreshes its address. A (re-)registered agent is
/// `idle` with a clean failure count.
pub async fn register_agent(pool: &PgPool, req: RegisterAgent) -> Result<Agent> {
    validate_register_request(&req)?;

    let agent = agent_repository::register(pool, &req).await?;

    tracing::info!("Agent registered: {} at {}", agent.id, agent.base_url());

    Ok(agent)
}

/// Get an agent by ID
pub async fn get_agent(pool: &PgPool, id: &str) -> Result<Agent> {
    agent_repository::find_by_id(pool, id)
        .await?
        .ok_or_else(|| AgentError::NotFound(id.to_string()))
}

fn validate_register_request(req: &RegisterAgent) -> Result<()> {
    if req.agent_id.trim().is_empty() {
        return Err(AgentError::ValidationError(
            "Agent ID cannot be empty".to_string(),
        ));
    }

    if req.agent_id.len() > 255 {
        return Err(AgentError::ValidationError(
            "Agent ID cannot exceed 255 characters".to_string(),
        ));
    }

    if req.host.trim().is_empty() {
        return Err(AgentError::ValidationError(
            "Agent host cannot be empty".to_string(),
        ));
    }

    if req.port == 0 {
        return Err(AgentError::ValidationError(
            "Agent port must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(agent_id: &str, host: &str, port: u16) -> RegisterAgent {
        RegisterAgent {
            agent_id: agent_id.to_string(),
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_validate_register_request() {
        assert!(validate_register_request(&request("agent-1", "10.0.0.5", 8081)).is_ok());
        assert!(matches!(
            validate_register_request(&request("  ", "10.0.0.5", 8081)),
            Err(AgentError::ValidationError(_))
        ));
        assert!(matches!(
            validate_register_request(&request("agent-1", "", 8081)),
            Err(AgentError::ValidationError(_))
        ));
        assert!(matches!(
            validate_register_request(&request("agent-1", "10.0.0.5", 0)),
            Err(AgentError::ValidationError(_))
        ));
        assert!(validate_register_request(&request(&"a".repeat(256), "h", 1)).is_err());
    }
}
