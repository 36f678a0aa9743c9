//! Git workspace management
//!
//! One shared bare repository per source repo and one disposable worktree per
//! (job, repo) pair. All mutation of the bare repositories goes through git,
//! one writer per bare repository at a time.

pub mod auth;
pub mod layout;
mod worktree;

pub use layout::WorkspaceLayout;
pub use worktree::WorktreeManager;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Errors from git operations.
///
/// Messages never contain credentials: command lines and stderr are redacted
/// before an error is built.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("base branch '{0}' not found")]
    BranchNotFound(String),
}

impl GitError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Runs one git command and returns its trimmed stdout.
///
/// `secrets` are scrubbed from anything that ends up in an error. Inherited
/// `GIT_DIR`/`GIT_WORK_TREE` are removed so the command only ever sees the
/// repository it was pointed at, and prompts are disabled so a missing
/// credential fails fast instead of hanging.
pub(crate) async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    timeout: Duration,
    secrets: &[&str],
) -> Result<String, GitError> {
    let command = auth::redact(&args.join(" "), secrets);

    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("git {}", command);

    let child = cmd.spawn().map_err(|source| GitError::Spawn {
        command: command.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?,
        Err(_) => return Err(GitError::Timeout { command, timeout }),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::Failed {
            command,
            stderr: auth::redact(stderr.trim(), secrets),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
