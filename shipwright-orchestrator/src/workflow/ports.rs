//! Collaborator interfaces
//!
//! Everything the workflow reads or writes outside of the agent goes through
//! these traits: job records, repository configuration, credentials, agents
//! and the two log sinks. Postgres-backed implementations live in
//! [`crate::store`]; tests use in-memory ones.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipwright_core::domain::agent::{Agent, AgentStatus};
use shipwright_core::domain::credentials::{CoderCredentials, GitCredentials};
use shipwright_core::domain::job::{Job, JobStatus};
use shipwright_core::domain::log::LogEvent;
use shipwright_core::domain::repo::RepoConfig;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Unavailable(String),
}

impl PortError {
    /// Whether retrying may help
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Database(_) | PortError::Unavailable(_))
    }
}

/// `UpdateJobStatus(jobId, orgId, status, prLink?, error?)`
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub status: JobStatus,
    pub pr_link: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: Uuid, org_id: Uuid) -> Result<Job, PortError>;

    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<(), PortError>;
}

#[async_trait]
pub trait RepoConfigStore: Send + Sync {
    async fn get_repo_configs(
        &self,
        repo_ids: &[String],
        org_id: Uuid,
    ) -> Result<HashMap<String, RepoConfig>, PortError>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn git_credentials(
        &self,
        job_id: Uuid,
        org_id: Uuid,
        repo_id: Option<&str>,
    ) -> Result<GitCredentials, PortError>;

    async fn coder_credentials(
        &self,
        org_id: Uuid,
        agent_id: Option<&str>,
    ) -> Result<CoderCredentials, PortError>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, PortError>;

    /// Record activity observed on the agent's channel
    async fn record_activity(&self, agent_id: &str, at: DateTime<Utc>) -> Result<(), PortError>;

    /// Failed liveness check: stop scheduling, count the failure
    async fn pause(&self, agent_id: &str) -> Result<(), PortError>;

    /// Passing liveness check: reset the failure count
    async fn confirm_live(&self, agent_id: &str) -> Result<(), PortError>;

    async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), PortError>;
}

/// Durable log storage
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(
        &self,
        job_id: Uuid,
        version: i32,
        org_id: Uuid,
        event: &LogEvent,
    ) -> Result<(), PortError>;
}

/// Live fan-out to subscribers; delivery never blocks the caller
pub trait Broadcast: Send + Sync {
    fn publish(&self, job_id: Uuid, event: &LogEvent);
}
