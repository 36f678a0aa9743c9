//! Log Service
//!
//! Stored job logs and the live per-job broadcast.

use std::collections::HashMap;
use std::sync::Mutex;

use shipwright_core::domain::log::LogEvent;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::repository::{job_repository, log_repository};
use crate::workflow::ports::Broadcast;

/// Events buffered per subscriber before it starts lagging
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Service error type
#[derive(Debug)]
pub enum LogError {
    JobNotFound(Uuid),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for LogError {
    fn from(err: sqlx::Error) -> Self {
        LogError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Get all stored log events for a job, oldest first
pub async fn get_job_logs(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEvent>> {
    job_repository::find_by_id(pool, job_id)
        .await?
        .ok_or(LogError::JobNotFound(job_id))?;

    let logs = log_repository::find_by_job(pool, job_id).await?;

    Ok(logs)
}

/// In-process fan-out of live log events, one channel per job.
///
/// Publishing never blocks: a job nobody listens to has no channel, and a
/// slow subscriber lags instead of holding up the sender.
#[derive(Default)]
pub struct JobBroadcast {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<LogEvent>>>,
}

impl JobBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<LogEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .subscribe()
    }

    /// Drop the job's channel; subscribers see the stream end
    pub fn close(&self, job_id: Uuid) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(&job_id);
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&job_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Broadcast for JobBroadcast {
    fn publish(&self, job_id: Uuid, event: &LogEvent) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(&job_id)
            && tx.send(event.clone()).is_err()
        {
            // every subscriber is gone
            channels.remove(&job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_core::domain::log::LogLevel;

    fn event(job_id: Uuid, message: &str) -> LogEvent {
        LogEvent::new(job_id, "setup", LogLevel::Info, message)
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let hub = JobBroadcast::new();
        let job_id = Uuid::new_v4();
        let mut first = hub.subscribe(job_id);
        let mut second = hub.subscribe(job_id);

        hub.publish(job_id, &event(job_id, "npm ci"));
        hub.publish(Uuid::new_v4(), &event(job_id, "other job"));

        assert_eq!(first.recv().await.unwrap().message, "npm ci");
        assert_eq!(second.recv().await.unwrap().message, "npm ci");
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_no_op() {
        let hub = JobBroadcast::new();
        let job_id = Uuid::new_v4();

        hub.publish(job_id, &event(job_id, "nobody listens"));
        assert_eq!(hub.subscriber_count(job_id), 0);

        let rx = hub.subscribe(job_id);
        drop(rx);
        hub.publish(job_id, &event(job_id, "gone"));
        assert!(hub.channels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let hub = JobBroadcast::new();
        let job_id = Uuid::new_v4();
        let mut rx = hub.subscribe(job_id);

        hub.close(job_id);

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
