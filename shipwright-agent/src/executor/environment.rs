//! Per-job environment
//!
//! Variables a job needs in its subprocesses (tool credentials) are kept per
//! job and handed to the child explicitly. The agent's own process
//! environment is never modified, so concurrent jobs cannot see each other's
//! secrets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct JobEnvironment {
    jobs: Arc<Mutex<HashMap<Uuid, HashMap<String, String>>>>,
}

impl JobEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, job_id: Uuid, key: impl Into<String>, value: impl Into<String>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job_id).or_default().insert(key.into(), value.into());
    }

    /// Variables to pass to a child process of this job
    pub fn snapshot(&self, job_id: Uuid) -> HashMap<String, String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&job_id).cloned().unwrap_or_default()
    }

    /// Drop the job's scope. Returns which of the `well_known` variables
    /// were set for it.
    pub fn clear(&self, job_id: Uuid, well_known: &[String]) -> Vec<String> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(vars) = jobs.remove(&job_id) else {
            return Vec::new();
        };
        well_known
            .iter()
            .filter(|name| vars.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
