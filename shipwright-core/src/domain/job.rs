//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::repo::RepoRef;

/// A natural-language coding task that is executed unattended and turned into
/// one pull request per configured repository.
///
/// Owned by the orchestrator; only the workflow and the queue mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Monotonic per retry or edit. Workflow history is keyed by (id, version).
    pub version: i32,
    pub org_id: Uuid,
    pub status: JobStatus,
    pub queue_type: QueueType,
    pub order_in_queue: i32,
    pub prompt: String,
    pub repos: Vec<RepoRef>,
    pub pr_links: Vec<String>,
    /// Agent the running workflow is bound to, if any
    pub agent_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Draft,
    Queued,
    InProgress,
    InReview,
    Completed,
    Failed,
}

impl JobStatus {
    /// Stable string form, identical to the serialized representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in-progress",
            JobStatus::InReview => "in-review",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(JobStatus::Draft),
            "queued" => Ok(JobStatus::Queued),
            "in-progress" => Ok(JobStatus::InProgress),
            "in-review" => Ok(JobStatus::InReview),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which queue a job waits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Normal backlog
    Backlog,
    /// Failure-retry queue
    Rework,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Backlog => "backlog",
            QueueType::Rework => "rework",
        }
    }
}

impl std::str::FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(QueueType::Backlog),
            "rework" => Ok(QueueType::Rework),
            other => Err(format!("unknown queue type: {}", other)),
        }
    }
}
