//! Repository command runner
//!
//! Runs repo-supplied setup/build/test commands through `sh -c` inside a
//! worktree, streaming output line by line while the command runs.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::logger::StepLogger;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with code {code}")]
    Exit { command: String, code: i32 },

    #[error("`{command}` was terminated by a signal")]
    Signal { command: String },

    #[error("`{command}` failed: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one command; stdout lines are logged as info, stderr lines as warn
    pub async fn run(
        &self,
        command: &str,
        cwd: &Path,
        logger: &StepLogger,
    ) -> Result<(), CommandError> {
        logger.info(format!("$ {}", command)).await;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stream_stdout = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logger.info(line).await;
                }
            }
        };
        let stream_stderr = async {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logger.warn(line).await;
                }
            }
        };

        let finished = tokio::time::timeout(self.timeout, async {
            let (_, _, status) = tokio::join!(stream_stdout, stream_stderr, child.wait());
            status
        })
        .await;

        let status = match finished {
            Ok(status) => status.map_err(|source| CommandError::Io {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out command: {}", e);
                }
                return Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(CommandError::Exit {
                command: command.to_string(),
                code,
            }),
            None => Err(CommandError::Signal {
                command: command.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::logger::drain_events;
    use shipwright_core::domain::log::LogLevel;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let dir = TempDir::new().unwrap();
        let (logger, mut rx) = StepLogger::channel(Uuid::new_v4(), "build");

        CommandRunner::new(Duration::from_secs(10))
            .run("echo out; echo err >&2", dir.path(), &logger)
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(events[0].message, "$ echo out; echo err >&2");
        assert!(events.iter().any(|e| e.message == "out" && e.level == LogLevel::Info));
        assert!(events.iter().any(|e| e.message == "err" && e.level == LogLevel::Warn));
    }

    #[tokio::test]
    async fn test_runs_inside_working_directory() {
        let dir = TempDir::new().unwrap();
        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "setup");

        CommandRunner::new(Duration::from_secs(10))
            .run("touch marker", dir.path(), &logger)
            .await
            .unwrap();

        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "setup");

        let err = CommandRunner::new(Duration::from_secs(10))
            .run("exit 1", dir.path(), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Exit { code: 1, .. }));
        assert_eq!(err.to_string(), "`exit 1` exited with code 1");
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = TempDir::new().unwrap();
        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "validate");

        let err = CommandRunner::new(Duration::from_millis(200))
            .run("sleep 5", dir.path(), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Timeout { .. }));
    }
}
