//! Best-effort job teardown
//!
//! Cleanup must never block job turnover. Every sub-action runs through a
//! [`Sweep`], which records and logs failures and keeps going; the caller
//! always gets a report back, never an error.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use shipwright_core::dto::workspace::CleanupReport;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use super::environment::JobEnvironment;
use crate::config::Config;
use crate::git::WorktreeManager;

/// Collects the failures of independent best-effort actions
#[derive(Debug)]
pub struct Sweep {
    job_id: Uuid,
    errors: Vec<String>,
}

impl Sweep {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            errors: Vec::new(),
        }
    }

    /// Run one action; a failure is logged and recorded, never returned
    pub async fn attempt<T, E, F>(&mut self, action: &str, fut: F) -> Option<T>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(job_id = %self.job_id, "Cleanup action '{}' failed: {}", action, e);
                self.errors.push(format!("{}: {}", action, e));
                None
            }
        }
    }

    /// Record a failure reported by an action that handles its own errors
    pub fn record(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!(job_id = %self.job_id, "Cleanup: {}", error);
        self.errors.push(error);
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

pub struct WorkspaceCleaner {
    worktrees: Arc<WorktreeManager>,
    environment: JobEnvironment,
    kill_processes: Vec<String>,
    paths: Vec<String>,
    env_vars: Vec<String>,
    command_timeout: Duration,
}

impl WorkspaceCleaner {
    pub fn new(config: &Config, worktrees: Arc<WorktreeManager>, environment: JobEnvironment) -> Self {
        Self {
            worktrees,
            environment,
            kill_processes: config.cleanup_kill_processes.clone(),
            paths: config.cleanup_paths.clone(),
            env_vars: config.cleanup_env_vars.clone(),
            command_timeout: Duration::from_secs(10),
        }
    }

    /// Tear down everything the job left behind
    pub async fn cleanup(&self, job_id: Uuid) -> CleanupReport {
        info!(job_id = %job_id, "Cleaning up job workspace");
        let mut sweep = Sweep::new(job_id);

        for name in &self.kill_processes {
            sweep
                .attempt(&format!("kill {}", name), self.kill_by_name(name))
                .await;
        }

        for template in &self.paths {
            let path = template.replace("{job_id}", &job_id.to_string());
            sweep
                .attempt(&format!("remove {}", path), remove_path(Path::new(&path)))
                .await;
        }

        let cleared = self.environment.clear(job_id, &self.env_vars);
        if !cleared.is_empty() {
            info!(job_id = %job_id, "Cleared job environment: {}", cleared.join(", "));
        }

        let job_dir = self.worktrees.layout().job_dir(job_id);
        let worktrees = self.worktrees.remove_all_worktrees_under(&job_dir).await;
        for error in worktrees.errors {
            sweep.record(error);
        }
        for path in &worktrees.unresolved {
            warn!(
                job_id = %job_id,
                "Worktree {} could not be unregistered; deleting it anyway",
                path.display()
            );
        }

        sweep
            .attempt("remove job directory", remove_path(&job_dir))
            .await;

        let report = CleanupReport {
            worktrees_removed: worktrees.removed.len(),
            unresolved_worktrees: worktrees
                .unresolved
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            errors: sweep.into_errors(),
        };

        if report.is_clean() {
            info!(job_id = %job_id, "Cleanup finished");
        } else {
            warn!(
                job_id = %job_id,
                "Cleanup finished with {} error(s), {} unresolved worktree(s)",
                report.errors.len(),
                report.unresolved_worktrees.len()
            );
        }

        report
    }

    async fn kill_by_name(&self, name: &str) -> Result<(), String> {
        let child = Command::new("pkill")
            .args(["-x", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("pkill unavailable: {}", e))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| "pkill timed out".to_string())?
            .map_err(|e| e.to_string())?;

        // 1 means nothing matched
        match output.status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        }
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
