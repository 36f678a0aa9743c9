//! Workflow activities
//!
//! The side-effecting calls the job workflow is made of. [`RemoteActivities`]
//! performs them against the collaborators and the job's agent; the workflow
//! only ever sees the [`Activities`] trait so its sequencing can be tested
//! with a scripted implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shipwright_client::{AgentClient, ClientError};
use shipwright_core::domain::credentials::CoderAuthKind;
use shipwright_core::domain::job::JobStatus;
use shipwright_core::domain::repo::RepoRef;
use shipwright_core::domain::step::Step;
use shipwright_core::dto::pr::CreatePrRequest;
use shipwright_core::dto::step::{StepCredentials, StepFrame, StepReport, StepRequest};
use shipwright_core::dto::workspace::{CleanupReport, CleanupRequest};
use uuid::Uuid;

use super::durable::{ActivityError, Heartbeat};
use super::logger::JobLogger;
use super::ports::{
    AgentStore, CredentialProvider, JobStatusUpdate, JobStore, PortError, RepoConfigStore,
};

/// Identifies one workflow run and the agent it is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobKey {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub version: i32,
    pub agent_id: String,
}

/// Everything the workflow needs about a job, minus secrets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPlan {
    pub key: JobKey,
    pub prompt: String,
    pub repos: Vec<RepoRef>,
}

/// What credential retrieval found; the secrets themselves stay out of history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub git_repos: Vec<String>,
    pub coder_kind: CoderAuthKind,
}

/// Final verdict handed to `UpdateJobStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub status: JobStatus,
    pub pr_link: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait Activities: Send + Sync {
    /// Mark the job in progress and assemble its plan
    async fn start_job(&self, key: &JobKey) -> Result<JobPlan, ActivityError>;

    async fn fetch_credentials(&self, plan: &JobPlan) -> Result<CredentialSummary, ActivityError>;

    async fn run_step(
        &self,
        plan: &JobPlan,
        step: Step,
        heartbeat: Heartbeat,
    ) -> Result<StepReport, ActivityError>;

    /// Returns the pull request URL
    async fn create_pr(
        &self,
        plan: &JobPlan,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<String, ActivityError>;

    async fn cleanup(&self, key: &JobKey) -> Result<CleanupReport, ActivityError>;

    async fn complete(&self, key: &JobKey, completion: &Completion) -> Result<(), ActivityError>;
}

impl From<PortError> for ActivityError {
    fn from(err: PortError) -> Self {
        if err.is_transient() {
            ActivityError::Transient(err.to_string())
        } else {
            ActivityError::Failed(err.to_string())
        }
    }
}

impl From<ClientError> for ActivityError {
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            ActivityError::Transient(err.to_string())
        } else {
            ActivityError::Failed(err.to_string())
        }
    }
}

/// Activities backed by the collaborators and the agent RPC surface
pub struct RemoteActivities {
    jobs: Arc<dyn JobStore>,
    repo_configs: Arc<dyn RepoConfigStore>,
    credentials: Arc<dyn CredentialProvider>,
    agents: Arc<dyn AgentStore>,
    logger: JobLogger,
    http: reqwest::Client,
}

impl RemoteActivities {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        repo_configs: Arc<dyn RepoConfigStore>,
        credentials: Arc<dyn CredentialProvider>,
        agents: Arc<dyn AgentStore>,
        logger: JobLogger,
    ) -> Self {
        Self {
            jobs,
            repo_configs,
            credentials,
            agents,
            logger,
            http: reqwest::Client::new(),
        }
    }

    async fn agent_client(&self, agent_id: &str) -> Result<AgentClient, ActivityError> {
        let agent = self
            .agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| {
                ActivityError::Failed(format!("agent {} is not registered", agent_id))
            })?;
        Ok(AgentClient::with_client(agent.base_url(), self.http.clone()))
    }

    /// Secrets for one step, fetched fresh so they are never recorded
    async fn step_credentials(&self, plan: &JobPlan, step: Step) -> Result<StepCredentials, ActivityError> {
        let mut credentials = StepCredentials::default();
        let key = &plan.key;

        match step {
            Step::Checkout => {
                for repo in &plan.repos {
                    let git = self
                        .credentials
                        .git_credentials(key.job_id, key.org_id, Some(&repo.repo_id))
                        .await?;
                    credentials.git.insert(repo.repo_id.clone(), git);
                }
            }
            Step::Execute => {
                credentials.coder = Some(
                    self.credentials
                        .coder_credentials(key.org_id, Some(&key.agent_id))
                        .await?,
                );
            }
            Step::Setup | Step::Build | Step::Validate => {}
        }

        Ok(credentials)
    }
}

#[async_trait]
impl Activities for RemoteActivities {
    async fn start_job(&self, key: &JobKey) -> Result<JobPlan, ActivityError> {
        self.jobs
            .update_job_status(JobStatusUpdate {
                job_id: key.job_id,
                org_id: key.org_id,
                status: JobStatus::InProgress,
                pr_link: None,
                error: None,
            })
            .await?;

        let job = self.jobs.get_job(key.job_id, key.org_id).await?;
        let repo_ids: Vec<String> = job.repos.iter().map(|r| r.repo_id.clone()).collect();
        let mut configs = self
            .repo_configs
            .get_repo_configs(&repo_ids, key.org_id)
            .await?;

        let mut repos = Vec::with_capacity(job.repos.len());
        for repo in job.repos {
            match configs.remove(&repo.repo_id) {
                Some(config) => repos.push(config.into_repo_ref(repo.repo_id)),
                None => {
                    return Err(ActivityError::Failed(format!(
                        "repository {} has no configuration",
                        repo.repo_id
                    )));
                }
            }
        }

        Ok(JobPlan {
            key: key.clone(),
            prompt: job.prompt,
            repos,
        })
    }

    async fn fetch_credentials(&self, plan: &JobPlan) -> Result<CredentialSummary, ActivityError> {
        let key = &plan.key;
        let mut git_repos = Vec::with_capacity(plan.repos.len());
        for repo in &plan.repos {
            let credentials = self
                .credentials
                .git_credentials(key.job_id, key.org_id, Some(&repo.repo_id))
                .await?;
            if credentials.token.is_empty() {
                return Err(ActivityError::Failed(format!(
                    "empty Git token for {}",
                    repo.repo_id
                )));
            }
            git_repos.push(repo.repo_id.clone());
        }

        let coder = self
            .credentials
            .coder_credentials(key.org_id, Some(&key.agent_id))
            .await?;

        Ok(CredentialSummary {
            git_repos,
            coder_kind: coder.kind,
        })
    }

    async fn run_step(
        &self,
        plan: &JobPlan,
        step: Step,
        heartbeat: Heartbeat,
    ) -> Result<StepReport, ActivityError> {
        let client = self.agent_client(&plan.key.agent_id).await?;
        let request = StepRequest {
            job_id: plan.key.job_id,
            org_id: plan.key.org_id,
            step,
            repos: plan.repos.clone(),
            credentials: self.step_credentials(plan, step).await?,
            prompt: match step {
                Step::Execute => Some(plan.prompt.clone()),
                _ => None,
            },
        };

        let mut stream = client.run_step(&request).await?;
        heartbeat.beat();

        while let Some(frame) = stream.next_frame().await? {
            heartbeat.beat();
            match frame {
                StepFrame::Log(event) => self.logger.relay(&event).await,
                StepFrame::Heartbeat { .. } => {}
                StepFrame::Result(report) => return Ok(report),
                StepFrame::Error(e) => {
                    return Err(ActivityError::Failed(format!("agent error {}", e)));
                }
            }
        }

        Err(ActivityError::Transient(
            "step stream ended without a result".to_string(),
        ))
    }

    async fn create_pr(
        &self,
        plan: &JobPlan,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<String, ActivityError> {
        let key = &plan.key;
        let credentials = self
            .credentials
            .git_credentials(key.job_id, key.org_id, Some(&repo.repo_id))
            .await?;

        let client = self.agent_client(&key.agent_id).await?;
        let response = client
            .create_pr(&CreatePrRequest {
                job_id: key.job_id,
                org_id: key.org_id,
                repo: repo.clone(),
                credentials,
                title: title.to_string(),
                body: body.to_string(),
            })
            .await?;

        Ok(response.url)
    }

    async fn cleanup(&self, key: &JobKey) -> Result<CleanupReport, ActivityError> {
        let client = self.agent_client(&key.agent_id).await?;
        Ok(client
            .cleanup_workspace(&CleanupRequest {
                job_id: key.job_id,
                org_id: key.org_id,
            })
            .await?)
    }

    async fn complete(&self, key: &JobKey, completion: &Completion) -> Result<(), ActivityError> {
        self.jobs
            .update_job_status(JobStatusUpdate {
                job_id: key.job_id,
                org_id: key.org_id,
                status: completion.status,
                pr_link: completion.pr_link.clone(),
                error: completion.error.clone(),
            })
            .await?;
        Ok(())
    }
}
