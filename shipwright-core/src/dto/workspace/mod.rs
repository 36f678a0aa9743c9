//! Workspace cleanup DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to tear down everything a job left on an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub job_id: Uuid,
    pub org_id: Uuid,
}

/// Outcome of a best-effort cleanup.
///
/// Cleanup never fails from the caller's perspective; problems are listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub worktrees_removed: usize,
    pub unresolved_worktrees: Vec<String>,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.unresolved_worktrees.is_empty()
    }
}
