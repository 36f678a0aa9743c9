//! Job log fan-out
//!
//! Every `LogEvent` the workflow produces or relays from an agent is stored
//! through the [`LogSink`] and published on the [`Broadcast`]. Neither failure
//! is propagated: losing a log line must never fail a job.

use std::sync::Arc;

use shipwright_core::domain::log::{LogEvent, LogLevel};
use uuid::Uuid;

use super::ports::{Broadcast, LogSink};

#[derive(Clone)]
pub struct JobLogger {
    job_id: Uuid,
    version: i32,
    org_id: Uuid,
    sink: Arc<dyn LogSink>,
    broadcast: Arc<dyn Broadcast>,
}

impl JobLogger {
    pub fn new(
        job_id: Uuid,
        version: i32,
        org_id: Uuid,
        sink: Arc<dyn LogSink>,
        broadcast: Arc<dyn Broadcast>,
    ) -> Self {
        Self {
            job_id,
            version,
            org_id,
            sink,
            broadcast,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Store and publish an event produced elsewhere (e.g. by an agent)
    pub async fn relay(&self, event: &LogEvent) {
        if let Err(e) = self
            .sink
            .append(self.job_id, self.version, self.org_id, event)
            .await
        {
            tracing::warn!(job_id = %self.job_id, "Failed to store log event: {}", e);
        }
        self.broadcast.publish(self.job_id, event);
    }

    /// Emit a new event, mirrored to `tracing`
    pub async fn log(&self, stage: &str, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::new(self.job_id, stage, level, message);

        match level {
            LogLevel::Debug => tracing::debug!(job_id = %self.job_id, stage, "{}", event.message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(job_id = %self.job_id, stage, "{}", event.message)
            }
            LogLevel::Warn => tracing::warn!(job_id = %self.job_id, stage, "{}", event.message),
            LogLevel::Error => tracing::error!(job_id = %self.job_id, stage, "{}", event.message),
        }

        self.relay(&event).await;
    }

    pub async fn info(&self, stage: &str, message: impl Into<String>) {
        self.log(stage, LogLevel::Info, message).await;
    }

    pub async fn warn(&self, stage: &str, message: impl Into<String>) {
        self.log(stage, LogLevel::Warn, message).await;
    }

    pub async fn error(&self, stage: &str, message: impl Into<String>) {
        self.log(stage, LogLevel::Error, message).await;
    }

    pub async fn success(&self, stage: &str, message: impl Into<String>) {
        self.log(stage, LogLevel::Success, message).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::workflow::ports::PortError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink and broadcast that keep everything in memory
    #[derive(Default)]
    pub struct RecordingLogs {
        pub stored: Mutex<Vec<LogEvent>>,
        pub published: Mutex<Vec<LogEvent>>,
        pub fail_appends: bool,
    }

    impl RecordingLogs {
        pub fn messages(&self) -> Vec<String> {
            self.stored
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.message.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LogSink for RecordingLogs {
        async fn append(
            &self,
            _job_id: Uuid,
            _version: i32,
            _org_id: Uuid,
            event: &LogEvent,
        ) -> Result<(), PortError> {
            if self.fail_appends {
                return Err(PortError::Unavailable("log store down".to_string()));
            }
            self.stored.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    impl Broadcast for RecordingLogs {
        fn publish(&self, _job_id: Uuid, event: &LogEvent) {
            self.published.lock().unwrap().push(event.clone());
        }
    }

    pub fn logger(logs: &Arc<RecordingLogs>) -> JobLogger {
        JobLogger::new(Uuid::new_v4(), 1, Uuid::new_v4(), logs.clone(), logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_events_reach_both_sinks() {
        let logs = Arc::new(RecordingLogs::default());
        let logger = logger(&logs);

        logger.info("workflow", "Job started").await;

        assert_eq!(logs.messages(), vec!["Job started".to_string()]);
        let published = logs.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].stage, "workflow");
        assert_eq!(published[0].job_id, logger.job_id());
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let logs = Arc::new(RecordingLogs {
            fail_appends: true,
            ..Default::default()
        });

        logger(&logs).error("setup", "boom").await;

        assert!(logs.stored.lock().unwrap().is_empty());
        assert_eq!(logs.published.lock().unwrap().len(), 1);
    }
}
