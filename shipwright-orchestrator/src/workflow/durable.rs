//! Durable execution
//!
//! A workflow is a deterministic sequence of activity calls. Each call gets a
//! sequence number; its outcome is written to a [`HistoryStore`] before the
//! workflow moves on. When a run is resumed (e.g. after a restart) the
//! recorded outcomes are replayed in order without calling anything, so the
//! workflow code re-walks the same path and continues live from the first
//! unrecorded call.
//!
//! Live calls get a start-to-close timeout, an optional heartbeat watchdog and
//! a retry policy. Only transient failures and timeouts are retried.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shipwright_core::domain::log::LogLevel;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until};
use uuid::Uuid;

use super::logger::JobLogger;

// =============================================================================
// Policies
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, counting from 1
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(delay.min(self.maximum_interval.as_secs_f64()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub start_to_close_timeout: Duration,
    /// Longest silence tolerated between heartbeats; `None` disables the watchdog
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    /// Options for remote step calls
    pub fn step(start_to_close: Duration, heartbeat: Duration) -> Self {
        Self {
            start_to_close_timeout: start_to_close,
            heartbeat_timeout: Some(heartbeat),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(30 * 60),
            heartbeat_timeout: Some(Duration::from_secs(5 * 60)),
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// Activities
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActivityError {
    /// May succeed if tried again (transport errors, unavailable collaborators)
    #[error("{0}")]
    Transient(String),

    /// Will fail the same way again
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no heartbeat for {0:?}")]
    HeartbeatTimeout(Duration),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActivityError::Failed(_))
    }
}

/// Handed to a running activity so it can prove it is still making progress
#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<watch::Sender<Instant>>);

impl Heartbeat {
    fn new() -> (Self, watch::Receiver<Instant>) {
        let (tx, rx) = watch::channel(Instant::now());
        (Self(Arc::new(tx)), rx)
    }

    /// A heartbeat nobody watches
    pub fn detached() -> Self {
        Self::new().0
    }

    pub fn beat(&self) {
        self.0.send_replace(Instant::now());
    }
}

// =============================================================================
// History
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkflowKey {
    pub job_id: Uuid,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Completed { value: serde_json::Value },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: i32,
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store: {0}")]
    Store(String),

    #[error("corrupt history entry #{seq}: {source}")]
    Corrupt {
        seq: i32,
        #[source]
        source: serde_json::Error,
    },
}

impl From<sqlx::Error> for HistoryError {
    fn from(err: sqlx::Error) -> Self {
        HistoryError::Store(err.to_string())
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self, key: WorkflowKey) -> Result<Vec<HistoryEntry>, HistoryError>;

    async fn record(&self, key: WorkflowKey, entry: &HistoryEntry) -> Result<(), HistoryError>;
}

/// History kept in process memory; lost on restart
#[derive(Debug, Default)]
pub struct MemoryHistory {
    runs: Mutex<std::collections::HashMap<WorkflowKey, Vec<HistoryEntry>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, key: WorkflowKey) -> Vec<HistoryEntry> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(&key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn load(&self, key: WorkflowKey) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.entries(key))
    }

    async fn record(&self, key: WorkflowKey, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let entries = runs.entry(key).or_default();
        if !entries.iter().any(|e| e.seq == entry.seq) {
            entries.push(entry.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Workflow context
// =============================================================================

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The activity failed for good (after retries); the failure is recorded
    #[error("{name} failed: {message}")]
    Activity { name: String, message: String },

    #[error("non-deterministic replay at #{seq}: history has '{recorded}', workflow asked for '{requested}'")]
    NonDeterministic {
        seq: i32,
        recorded: String,
        requested: String,
    },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to encode result of {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WorkflowError {
    /// Message of a failed activity; `None` for substrate errors
    pub fn activity_message(&self) -> Option<&str> {
        match self {
            WorkflowError::Activity { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub struct WorkflowContext {
    key: WorkflowKey,
    history: Arc<dyn HistoryStore>,
    recorded: Vec<HistoryEntry>,
    next: usize,
    logger: JobLogger,
}

impl WorkflowContext {
    /// Load the run's history; calls already recorded will be replayed
    pub async fn load(
        key: WorkflowKey,
        history: Arc<dyn HistoryStore>,
        logger: JobLogger,
    ) -> Result<Self, WorkflowError> {
        let mut recorded = history.load(key).await?;
        recorded.sort_by_key(|e| e.seq);

        if !recorded.is_empty() {
            tracing::info!(
                job_id = %key.job_id,
                version = key.version,
                "Resuming workflow, replaying {} recorded call(s)",
                recorded.len()
            );
        }

        Ok(Self {
            key,
            history,
            recorded,
            next: 0,
            logger,
        })
    }

    pub fn key(&self) -> WorkflowKey {
        self.key
    }

    /// True while the workflow is re-walking recorded calls
    pub fn is_replaying(&self) -> bool {
        self.next < self.recorded.len()
    }

    /// Job log event, suppressed while replaying
    pub async fn log(&self, stage: &str, level: LogLevel, message: impl Into<String>) {
        if !self.is_replaying() {
            self.logger.log(stage, level, message).await;
        }
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Run (or replay) one activity call
    pub async fn execute<T, F, Fut>(
        &mut self,
        name: &str,
        options: &ActivityOptions,
        activity: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Heartbeat) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let seq = self.next as i32;

        if let Some(entry) = self.recorded.get(self.next) {
            if entry.name != name {
                return Err(WorkflowError::NonDeterministic {
                    seq,
                    recorded: entry.name.clone(),
                    requested: name.to_string(),
                });
            }
            self.next += 1;
            tracing::debug!(job_id = %self.key.job_id, seq, "Replaying {}", name);
            return match &entry.outcome {
                Outcome::Completed { value } => serde_json::from_value(value.clone())
                    .map_err(|source| HistoryError::Corrupt { seq, source }.into()),
                Outcome::Failed { message } => Err(WorkflowError::Activity {
                    name: name.to_string(),
                    message: message.clone(),
                }),
            };
        }

        self.logger
            .log("workflow", LogLevel::Debug, format!("Calling {} (#{})", name, seq))
            .await;

        let started = Instant::now();
        let result = run_with_retry(&self.logger, name, options, &activity).await;

        let (outcome, returned) = match result {
            Ok(value) => {
                let encoded = serde_json::to_value(&value).map_err(|source| WorkflowError::Encode {
                    name: name.to_string(),
                    source,
                })?;
                (Outcome::Completed { value: encoded }, Ok(value))
            }
            Err(e) => {
                let message = e.to_string();
                (
                    Outcome::Failed {
                        message: message.clone(),
                    },
                    Err(WorkflowError::Activity {
                        name: name.to_string(),
                        message,
                    }),
                )
            }
        };

        let entry = HistoryEntry {
            seq,
            name: name.to_string(),
            outcome,
        };
        self.history.record(self.key, &entry).await?;
        self.next += 1;

        let verdict = match &returned {
            Ok(_) => "completed".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        self.logger
            .log(
                "workflow",
                LogLevel::Debug,
                format!("{} (#{}) {} in {:?}", name, seq, verdict, started.elapsed()),
            )
            .await;

        returned
    }
}

async fn run_with_retry<T, F, Fut>(
    logger: &JobLogger,
    name: &str,
    options: &ActivityOptions,
    activity: &F,
) -> Result<T, ActivityError>
where
    F: Fn(Heartbeat) -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let attempts = options.retry.maximum_attempts.max(1);
    let mut attempt = 1;

    loop {
        match run_attempt(options, activity).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = options.retry.delay_after(attempt);
                logger
                    .warn(
                        "workflow",
                        format!(
                            "{} attempt {}/{} failed: {}; retrying in {:?}",
                            name, attempt, attempts, e, delay
                        ),
                    )
                    .await;
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_attempt<T, F, Fut>(options: &ActivityOptions, activity: &F) -> Result<T, ActivityError>
where
    F: Fn(Heartbeat) -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let (heartbeat, mut beats) = Heartbeat::new();
    // Keeps the channel open even if the activity drops its handle
    let _watch = heartbeat.clone();

    let call = activity(heartbeat);
    tokio::pin!(call);

    let deadline = Instant::now() + options.start_to_close_timeout;
    let mut last_beat = Instant::now();

    loop {
        let silence_deadline = options.heartbeat_timeout.map(|t| last_beat + t);

        tokio::select! {
            result = &mut call => return result,
            changed = beats.changed() => {
                if changed.is_ok() {
                    last_beat = *beats.borrow_and_update();
                }
            }
            _ = sleep_until(deadline) => {
                return Err(ActivityError::Timeout(options.start_to_close_timeout));
            }
            _ = sleep_until(silence_deadline.unwrap_or(deadline)), if silence_deadline.is_some() => {
                return Err(ActivityError::HeartbeatTimeout(
                    options.heartbeat_timeout.unwrap_or_default(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::logger::testing::{RecordingLogs, logger};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options() -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_secs(5),
            heartbeat_timeout: None,
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 2.0,
                maximum_interval: Duration::from_millis(5),
                maximum_attempts: 3,
            },
        }
    }

    async fn context(history: &Arc<MemoryHistory>, key: WorkflowKey) -> WorkflowContext {
        let logs = Arc::new(RecordingLogs::default());
        WorkflowContext::load(key, history.clone(), logger(&logs)).await.unwrap()
    }

    fn key() -> WorkflowKey {
        WorkflowKey {
            job_id: Uuid::new_v4(),
            version: 1,
        }
    }

    #[test]
    fn test_retry_delays_back_off_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(5), Duration::from_secs(16));
        assert_eq!(policy.delay_after(7), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let history = Arc::new(MemoryHistory::new());
        let mut ctx = context(&history, key()).await;
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let value: u32 = ctx
            .execute("flaky", &fast_options(), move |_| async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ActivityError::Transient("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_definite_failures_are_not_retried() {
        let history = Arc::new(MemoryHistory::new());
        let k = key();
        let mut ctx = context(&history, k).await;
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = ctx
            .execute::<(), _, _>("rejected", &fast_options(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ActivityError::Failed("bad request".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.activity_message(), Some("bad request"));
        assert_eq!(
            history.entries(k)[0].outcome,
            Outcome::Failed {
                message: "bad request".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let history = Arc::new(MemoryHistory::new());
        let mut ctx = context(&history, key()).await;
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = ctx
            .execute::<(), _, _>("down", &fast_options(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ActivityError::Transient("unavailable".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, WorkflowError::Activity { .. }));
    }

    #[tokio::test]
    async fn test_start_to_close_timeout() {
        let history = Arc::new(MemoryHistory::new());
        let mut ctx = context(&history, key()).await;
        let mut options = fast_options();
        options.start_to_close_timeout = Duration::from_millis(50);
        options.retry.maximum_attempts = 1;

        let err = ctx
            .execute::<(), _, _>("slow", &options, |_| async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.activity_message().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_heartbeats_keep_activity_alive() {
        let history = Arc::new(MemoryHistory::new());
        let mut ctx = context(&history, key()).await;
        let mut options = fast_options();
        options.heartbeat_timeout = Some(Duration::from_millis(100));
        options.retry.maximum_attempts = 1;

        let value: u32 = ctx
            .execute("chatty", &options, |heartbeat| async move {
                for _ in 0..6 {
                    sleep(Duration::from_millis(40)).await;
                    heartbeat.beat();
                }
                Ok(6)
            })
            .await
            .unwrap();
        assert_eq!(value, 6);

        let err = ctx
            .execute::<(), _, _>("silent", &options, |_heartbeat| async move {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.activity_message().unwrap().contains("no heartbeat"));
    }

    #[tokio::test]
    async fn test_replay_skips_recorded_calls() {
        let history = Arc::new(MemoryHistory::new());
        let k = key();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        {
            let mut ctx = context(&history, k).await;
            let first: String = ctx
                .execute("first", &fast_options(), move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("one".to_string())
                })
                .await
                .unwrap();
            assert_eq!(first, "one");
        }

        let mut ctx = context(&history, k).await;
        assert!(ctx.is_replaying());

        let replayed: String = ctx
            .execute("first", &fast_options(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("changed".to_string())
            })
            .await
            .unwrap();
        assert_eq!(replayed, "one");
        assert!(!ctx.is_replaying());

        let live: String = ctx
            .execute("second", &fast_options(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("two".to_string())
            })
            .await
            .unwrap();
        assert_eq!(live, "two");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(history.entries(k).len(), 2);
    }

    #[tokio::test]
    async fn test_replay_detects_divergence() {
        let history = Arc::new(MemoryHistory::new());
        let k = key();

        let mut ctx = context(&history, k).await;
        ctx.execute("checkout", &fast_options(), |_| async { Ok(()) })
            .await
            .unwrap();

        let mut resumed = context(&history, k).await;
        let err = resumed
            .execute("setup", &fast_options(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NonDeterministic { seq: 0, .. }));
    }

    #[tokio::test]
    async fn test_replayed_failure_is_returned_again() {
        let history = Arc::new(MemoryHistory::new());
        let k = key();

        let mut ctx = context(&history, k).await;
        let _ = ctx
            .execute::<(), _, _>("checkout", &fast_options(), |_| async {
                Err(ActivityError::Failed("clone failed".to_string()))
            })
            .await;

        let mut resumed = context(&history, k).await;
        let err = resumed
            .execute::<(), _, _>("checkout", &fast_options(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.activity_message(), Some("clone failed"));
    }
}
