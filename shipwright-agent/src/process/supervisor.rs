//! Code-generation subprocess supervision
//!
//! The tool runs with stdin closed. Its stdout and stderr are read line by
//! line by two reader tasks that push into one bounded queue; the supervisor
//! loop drains that queue, so a slow consumer applies backpressure to the
//! readers instead of buffering without limit.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use shipwright_core::domain::log::LogLevel;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use super::events::CoderEvent;
use super::session::SessionState;
use crate::executor::logger::StepLogger;

/// Capacity of the subprocess output queue
const OUTPUT_QUEUE_CAPACITY: usize = 256;

/// Stderr fragments that mean the tool cannot authenticate
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication failed",
    "authentication required",
    "not authenticated",
    "not logged in",
    "invalid api key",
    "login required",
];

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication timeout: no output within {0:?}")]
    AuthTimeout(Duration),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("exited with {code}{}", stderr_suffix(.stderr))]
    Exit { code: String, stderr: Option<String> },

    #[error("tool reported an error: {0}")]
    ToolError(String),

    #[error("I/O error while supervising: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &Option<String>) -> String {
    stderr
        .as_ref()
        .map(|s| format!(": {}", s))
        .unwrap_or_default()
}

/// Timeouts and executable for tool runs
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub executable: String,
    /// No stdout within this window is treated as an authentication failure
    pub startup_timeout: Duration,
    /// Hard ceiling on the whole run
    pub overall_timeout: Duration,
    /// How long queued output is still drained after the process exits
    pub drain_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(executable: impl Into<String>, startup: Duration, overall: Duration) -> Self {
        Self {
            executable: executable.into(),
            startup_timeout: startup,
            overall_timeout: overall,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// One tool run
#[derive(Debug)]
pub struct CoderInvocation<'a> {
    pub workspace: &'a Path,
    pub prompt: &'a str,
    /// Overrides the configured executable
    pub executable: Option<&'a str>,
    /// Explicit variables; they take priority over the inherited environment
    pub env: HashMap<String, String>,
}

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub tool_calls: u64,
    pub files_touched: usize,
    pub lines_generated: u64,
    pub text: String,
}

enum Output {
    Stdout(String),
    Stderr(String),
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the tool to completion, streaming its progress through `logger`
    pub async fn run(
        &self,
        invocation: CoderInvocation<'_>,
        logger: &StepLogger,
    ) -> Result<SessionSummary, SupervisorError> {
        let executable = invocation
            .executable
            .unwrap_or(self.config.executable.as_str())
            .to_string();

        let mut cmd = Command::new(&executable);
        cmd.args(["--print", "--output-format", "stream-json", "--force"])
            .arg(invocation.prompt)
            .current_dir(invocation.workspace)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            executable: executable.clone(),
            source,
        })?;

        logger
            .info(format!("Started {} in {}", executable, invocation.workspace.display()))
            .await;

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, tx.clone(), Output::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, tx.clone(), Output::Stderr));
        }
        drop(tx);

        self.supervise(child, rx, logger).await
    }

    async fn supervise(
        &self,
        mut child: Child,
        mut rx: mpsc::Receiver<Output>,
        logger: &StepLogger,
    ) -> Result<SessionSummary, SupervisorError> {
        let started = Instant::now();
        let startup_deadline = started + self.config.startup_timeout;
        let overall_deadline = started + self.config.overall_timeout;

        let mut state = SessionState::new();
        let mut seen_stdout = false;
        let mut last_stderr: Option<String> = None;
        let mut exit_status = None;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let deadline = match drain_deadline {
                Some(drain) => drain.min(overall_deadline),
                None if !seen_stdout => startup_deadline.min(overall_deadline),
                None => overall_deadline,
            };

            tokio::select! {
                biased;

                output = rx.recv() => match output {
                    Some(Output::Stdout(line)) => {
                        seen_stdout = true;
                        self.handle_stdout(&line, &mut state, logger).await;
                    }
                    Some(Output::Stderr(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        logger.warn(trimmed.to_string()).await;
                        if is_auth_failure(trimmed) {
                            kill(&mut child).await;
                            return Err(SupervisorError::AuthFailure(trimmed.to_string()));
                        }
                        last_stderr = Some(trimmed.to_string());
                    }
                    // Both pipes closed
                    None => break,
                },

                status = child.wait(), if exit_status.is_none() => {
                    let status = status?;
                    debug!("Tool exited with {}", status);
                    exit_status = Some(status);
                    drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                }

                _ = sleep_until(deadline) => {
                    if drain_deadline.is_some() && deadline < overall_deadline {
                        // Exited, but something still holds the pipes open
                        warn!("Output still open after tool exit, stopping drain");
                        break;
                    }
                    kill(&mut child).await;
                    if !seen_stdout && deadline == startup_deadline {
                        logger
                            .error(format!(
                                "No output within {:?}; assuming the tool could not authenticate",
                                self.config.startup_timeout
                            ))
                            .await;
                        return Err(SupervisorError::AuthTimeout(self.config.startup_timeout));
                    }
                    logger
                        .error(format!("Tool did not finish within {:?}", self.config.overall_timeout))
                        .await;
                    return Err(SupervisorError::Timeout(self.config.overall_timeout));
                }
            }
        }

        let status = match exit_status {
            Some(status) => status,
            None => {
                let remaining = overall_deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        kill(&mut child).await;
                        return Err(SupervisorError::Timeout(self.config.overall_timeout));
                    }
                }
            }
        };

        if !status.success() {
            let code = status
                .code()
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "a signal".to_string());
            return Err(SupervisorError::Exit {
                code,
                stderr: last_stderr,
            });
        }

        if let Some(result) = state.result() {
            if result.is_error {
                return Err(SupervisorError::ToolError(
                    result.message.clone().unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
        }

        logger.success(state.summary()).await;

        Ok(SessionSummary {
            tool_calls: state.tool_calls(),
            files_touched: state.files().len(),
            lines_generated: state.lines_generated(),
            text: state.text().to_string(),
        })
    }

    async fn handle_stdout(&self, line: &str, state: &mut SessionState, logger: &StepLogger) {
        let trimmed = line.trim();
        match serde_json::from_str::<CoderEvent>(trimmed) {
            Ok(event) => {
                for (level, message) in state.apply(event) {
                    logger.log(level, message).await;
                }
            }
            Err(_) if is_noise(trimmed) => {}
            Err(_) => logger.log(LogLevel::Debug, trimmed.to_string()).await,
        }
    }
}

async fn read_lines<R, F>(reader: R, tx: mpsc::Sender<Output>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> Output,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading tool output: {}", e);
                break;
            }
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill tool process: {}", e);
    }
}

fn is_auth_failure(line: &str) -> bool {
    let lower = line.to_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Blank lines and lines without any alphanumeric content
fn is_noise(line: &str) -> bool {
    !line.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::logger::drain_events;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Write an executable shell script standing in for the tool
    fn script(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-coder.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn supervisor(executable: &str, startup_ms: u64, overall_ms: u64) -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorConfig::new(
            executable,
            Duration::from_millis(startup_ms),
            Duration::from_millis(overall_ms),
        ))
    }

    fn invocation(dir: &TempDir) -> CoderInvocation<'_> {
        CoderInvocation {
            workspace: dir.path(),
            prompt: "add a README",
            executable: None,
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_successful_run_streams_events() {
        let dir = TempDir::new().unwrap();
        let exe = script(
            &dir,
            r##"printf '%s\n' '{"type":"system","subtype":"init","model":"m1"}'
printf '\n'
printf '%s\n' '{"type":"tool_call","subtype":"started","tool_call":{"writeToolCall":{"args":{"path":"README.md"}}}}'
printf '%s\n' '{"type":"tool_call","subtype":"completed","tool_call":{"writeToolCall":{"args":{"path":"README.md","fileText":"# hi\n"},"result":{"success":{"linesCreated":1,"fileSize":5}}}}}'
printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"duration_ms":10}'"##,
        );
        let (logger, mut rx) = StepLogger::channel(Uuid::new_v4(), "execute");

        let summary = supervisor(&exe, 5_000, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap();

        assert_eq!(summary.tool_calls, 1);
        assert_eq!(summary.lines_generated, 1);

        let messages: Vec<String> = drain_events(&mut rx).into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m == "Using model m1"));
        assert!(messages.iter().any(|m| m == "#1 Writing README.md"));
        assert!(messages.iter().any(|m| m.starts_with("Finished in")));
    }

    #[tokio::test]
    async fn test_silent_process_fails_with_auth_timeout() {
        let dir = TempDir::new().unwrap();
        let exe = script(&dir, "sleep 30");

        let started = std::time::Instant::now();
        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 300, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::AuthTimeout(_)));
        assert!(err.to_string().contains("authentication timeout"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_auth_keyword_on_stderr_kills_immediately() {
        let dir = TempDir::new().unwrap();
        let exe = script(&dir, "echo 'Error: Unauthorized, please log in' >&2\nsleep 30");

        let started = std::time::Instant::now();
        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 10_000, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::AuthFailure(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_overall_timeout_kills_chatty_process() {
        let dir = TempDir::new().unwrap();
        let exe = script(
            &dir,
            r#"while true; do echo '{"type":"assistant","message":{"content":[]}}'; sleep 0.05; done"#,
        );

        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 2_000, 500)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_even_after_output() {
        let dir = TempDir::new().unwrap();
        let exe = script(&dir, r#"echo '{"type":"system","model":"m"}'; echo 'boom' >&2; exit 3"#);

        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 5_000, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        match err {
            SupervisorError::Exit { code, stderr } => {
                assert_eq!(code, "exit code 3");
                assert_eq!(stderr.as_deref(), Some("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_error_result_fails_step() {
        let dir = TempDir::new().unwrap();
        let exe = script(&dir, r#"echo '{"type":"result","is_error":true,"result":"quota exceeded"}'"#);

        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 5_000, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::ToolError(ref m) if m == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_final_event_in_same_tick_as_exit_is_kept() {
        let dir = TempDir::new().unwrap();
        let exe = script(&dir, r#"printf '%s\n' '{"type":"result","is_error":true,"result":"late"}'; exit 0"#);

        let (logger, _rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let err = supervisor(&exe, 5_000, 20_000)
            .run(invocation(&dir), &logger)
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::ToolError(_)));
    }

    #[tokio::test]
    async fn test_explicit_env_is_passed_to_tool() {
        let dir = TempDir::new().unwrap();
        let exe = script(
            &dir,
            r#"echo "{\"type\":\"system\",\"model\":\"$CURSOR_API_KEY\"}""#,
        );

        let (logger, mut rx) = StepLogger::channel(Uuid::new_v4(), "execute");
        let mut run = invocation(&dir);
        run.env.insert("CURSOR_API_KEY".to_string(), "from-job".to_string());

        supervisor(&exe, 5_000, 20_000).run(run, &logger).await.unwrap();

        let messages: Vec<String> = drain_events(&mut rx).into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m == "Using model from-job"));
    }

    #[test]
    fn test_noise_and_auth_detection() {
        assert!(is_noise("   "));
        assert!(is_noise("----"));
        assert!(!is_noise("Loading workspace"));
        assert!(is_auth_failure("ERROR: Not logged in"));
        assert!(!is_auth_failure("compiling 3 files"));
    }
}
