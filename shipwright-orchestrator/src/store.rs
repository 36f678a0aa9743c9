//! Collaborator implementations
//!
//! [`PgStore`] backs the workflow's job, repository configuration, agent, log
//! and history interfaces with the repository layer. [`EnvCredentialProvider`]
//! hands out the credentials the orchestrator was configured with.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipwright_core::domain::agent::{Agent, AgentStatus};
use shipwright_core::domain::credentials::{CoderAuthKind, CoderCredentials, GitCredentials};
use shipwright_core::domain::job::Job;
use shipwright_core::domain::log::LogEvent;
use shipwright_core::domain::repo::RepoConfig;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{
    agent_repository, history_repository, job_repository, log_repository, repo_config_repository,
};
use crate::workflow::durable::{HistoryEntry, HistoryError, HistoryStore, Outcome, WorkflowKey};
use crate::workflow::ports::{
    AgentStore, CredentialProvider, JobStatusUpdate, JobStore, LogSink, PortError, RepoConfigStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn get_job(&self, job_id: Uuid, org_id: Uuid) -> Result<Job, PortError> {
        job_repository::find_for_org(&self.pool, job_id, org_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("job {}", job_id)))
    }

    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<(), PortError> {
        let updated = job_repository::update_status(
            &self.pool,
            update.job_id,
            update.org_id,
            update.status,
            update.pr_link.as_deref(),
            update.error.as_deref(),
        )
        .await?;

        if !updated {
            return Err(PortError::NotFound(format!("job {}", update.job_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RepoConfigStore for PgStore {
    async fn get_repo_configs(
        &self,
        repo_ids: &[String],
        org_id: Uuid,
    ) -> Result<HashMap<String, RepoConfig>, PortError> {
        Ok(repo_config_repository::find_many(&self.pool, org_id, repo_ids).await?)
    }
}

#[async_trait]
impl AgentStore for PgStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, PortError> {
        Ok(agent_repository::find_by_id(&self.pool, agent_id).await?)
    }

    async fn record_activity(&self, agent_id: &str, at: DateTime<Utc>) -> Result<(), PortError> {
        agent_repository::touch(&self.pool, agent_id, at).await?;
        Ok(())
    }

    async fn pause(&self, agent_id: &str) -> Result<(), PortError> {
        agent_repository::mark_offline(&self.pool, agent_id).await?;
        Ok(())
    }

    async fn confirm_live(&self, agent_id: &str) -> Result<(), PortError> {
        agent_repository::mark_live(&self.pool, agent_id).await?;
        Ok(())
    }

    async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), PortError> {
        agent_repository::set_status(&self.pool, agent_id, status).await?;
        Ok(())
    }
}

#[async_trait]
impl LogSink for PgStore {
    async fn append(
        &self,
        _job_id: Uuid,
        version: i32,
        org_id: Uuid,
        event: &LogEvent,
    ) -> Result<(), PortError> {
        Ok(log_repository::append(&self.pool, version, org_id, event).await?)
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn load(&self, key: WorkflowKey) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = history_repository::find_by_run(&self.pool, key.job_id, key.version).await?;

        rows.into_iter()
            .map(|(seq, name, outcome)| {
                let outcome: Outcome = serde_json::from_value(outcome)
                    .map_err(|source| HistoryError::Corrupt { seq, source })?;
                Ok(HistoryEntry { seq, name, outcome })
            })
            .collect()
    }

    async fn record(&self, key: WorkflowKey, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let outcome = serde_json::to_value(&entry.outcome).map_err(|source| {
            HistoryError::Corrupt {
                seq: entry.seq,
                source,
            }
        })?;

        history_repository::insert(
            &self.pool,
            key.job_id,
            key.version,
            entry.seq,
            &entry.name,
            &outcome,
        )
        .await?;
        Ok(())
    }
}

/// Credentials from the orchestrator's own configuration, the same for every
/// job and repository
#[derive(Clone)]
pub struct EnvCredentialProvider {
    git_token: Option<String>,
    git_username: String,
    coder_api_key: Option<String>,
    coder_executable_path: Option<String>,
}

impl EnvCredentialProvider {
    pub fn from_config(config: &Config) -> Self {
        Self {
            git_token: config.git_token.clone(),
            git_username: config.git_username.clone(),
            coder_api_key: config.coder_api_key.clone(),
            coder_executable_path: config.coder_executable_path.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn git_credentials(
        &self,
        _job_id: Uuid,
        _org_id: Uuid,
        repo_id: Option<&str>,
    ) -> Result<GitCredentials, PortError> {
        match &self.git_token {
            Some(token) => Ok(GitCredentials {
                token: token.clone(),
                username: self.git_username.clone(),
            }),
            None => Err(PortError::NotFound(format!(
                "Git credentials for {}",
                repo_id.unwrap_or("organization")
            ))),
        }
    }

    async fn coder_credentials(
        &self,
        _org_id: Uuid,
        _agent_id: Option<&str>,
    ) -> Result<CoderCredentials, PortError> {
        let kind = if self.coder_api_key.is_some() {
            CoderAuthKind::ApiKey
        } else {
            CoderAuthKind::Session
        };

        Ok(CoderCredentials {
            kind,
            executable_path: self.coder_executable_path.clone(),
            api_key: self.coder_api_key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_key_takes_priority_over_session() {
        let mut config = Config::new("postgres://localhost/test".to_string());
        config.coder_api_key = Some("sk-test".to_string());
        let provider = EnvCredentialProvider::from_config(&config);

        let coder = provider
            .coder_credentials(Uuid::new_v4(), None)
            .await
            .unwrap();
        assert_eq!(coder.kind, CoderAuthKind::ApiKey);
        assert_eq!(coder.api_key.as_deref(), Some("sk-test"));

        config.coder_api_key = None;
        let coder = EnvCredentialProvider::from_config(&config)
            .coder_credentials(Uuid::new_v4(), Some("agent-1"))
            .await
            .unwrap();
        assert_eq!(coder.kind, CoderAuthKind::Session);
    }

    #[tokio::test]
    async fn test_missing_git_token_is_not_found() {
        let config = Config::new("postgres://localhost/test".to_string());
        let provider = EnvCredentialProvider::from_config(&config);

        let err = provider
            .git_credentials(Uuid::new_v4(), Uuid::new_v4(), Some("org/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_git_credentials_use_configured_username() {
        let mut config = Config::new("postgres://localhost/test".to_string());
        config.git_token = Some("ghp_test".to_string());
        let provider = EnvCredentialProvider::from_config(&config);

        let git = provider
            .git_credentials(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();
        assert_eq!(git.username, "x-access-token");
        assert_eq!(git.token, "ghp_test");
    }
}
