//! Pull request DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::credentials::GitCredentials;
use crate::domain::repo::RepoRef;

/// Request to publish a job's changes in one repository as a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrRequest {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub repo: RepoRef,
    pub credentials: GitCredentials,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrResponse {
    pub url: String,
}
