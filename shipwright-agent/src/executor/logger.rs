//! Live step logging
//!
//! Every side effect of a step is reported as a `LogEvent` frame pushed into
//! the bounded channel that backs the step's streamed response. Events are
//! mirrored to `tracing` so the agent's own logs show the same trail.

use shipwright_core::domain::log::{LogEvent, LogLevel};
use shipwright_core::dto::step::StepFrame;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Capacity of a step's frame queue
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// Sends log frames for one (job, stage)
#[derive(Debug, Clone)]
pub struct StepLogger {
    job_id: Uuid,
    stage: String,
    tx: mpsc::Sender<StepFrame>,
}

impl StepLogger {
    pub fn new(job_id: Uuid, stage: impl Into<String>, tx: mpsc::Sender<StepFrame>) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            tx,
        }
    }

    /// Logger plus the receiving end of a fresh frame queue
    pub fn channel(job_id: Uuid, stage: impl Into<String>) -> (Self, mpsc::Receiver<StepFrame>) {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        (Self::new(job_id, stage, tx), rx)
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Push a raw frame. A dropped receiver (caller went away) is ignored;
    /// use [`StepLogger::closed`] to notice it.
    pub async fn send(&self, frame: StepFrame) {
        let _ = self.tx.send(frame).await;
    }

    /// Resolves once the receiving side has gone away
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::new(self.job_id, self.stage.as_str(), level, message);

        match level {
            LogLevel::Debug => tracing::debug!(job_id = %self.job_id, stage = %self.stage, "{}", event.message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(job_id = %self.job_id, stage = %self.stage, "{}", event.message)
            }
            LogLevel::Warn => tracing::warn!(job_id = %self.job_id, stage = %self.stage, "{}", event.message),
            LogLevel::Error => tracing::error!(job_id = %self.job_id, stage = %self.stage, "{}", event.message),
        }

        self.send(StepFrame::Log(event)).await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await;
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message).await;
    }
}

/// Drain every frame currently queued (test helper)
#[cfg(test)]
pub fn drain_events(rx: &mut mpsc::Receiver<StepFrame>) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let StepFrame::Log(event) = frame {
            events.push(event);
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logger_emits_tagged_events_in_order() {
        let job_id = Uuid::new_v4();
        let (logger, mut rx) = StepLogger::channel(job_id, "setup");

        logger.info("npm ci").await;
        logger.warn("deprecated package").await;
        logger.success("done").await;

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "npm ci");
        assert_eq!(events[1].level, LogLevel::Warn);
        assert_eq!(events[2].level, LogLevel::Success);
        assert!(events.iter().all(|e| e.job_id == job_id && e.stage == "setup"));
    }

    #[tokio::test]
    async fn test_logger_ignores_dropped_receiver() {
        let (logger, rx) = StepLogger::channel(Uuid::new_v4(), "build");
        drop(rx);
        logger.info("nobody listening").await;
    }
}
