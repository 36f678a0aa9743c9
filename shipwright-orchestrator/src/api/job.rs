//! Job API Handlers
//!
//! Job logs (stored and live) and queue bookkeeping.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use shipwright_core::domain::job::{Job, QueueType};
use shipwright_core::domain::log::LogEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::{job_service, log_service};

/// Body of `POST /jobs/{id}/queue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveToQueue {
    pub org_id: Uuid,
    pub queue_type: QueueType,
}

/// GET /jobs/{id}/logs
/// Stored log events of a job, oldest first
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEvent>>> {
    tracing::debug!("Getting logs for job: {}", id);

    let logs = log_service::get_job_logs(&state.pool, id).await?;

    Ok(Json(logs))
}

/// GET /jobs/{id}/logs/stream
/// Live log events of a job as server-sent events
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Streaming logs for job: {}", id);

    let rx = state.broadcast.subscribe(id);
    Sse::new(log_events(rx)).keep_alive(KeepAlive::default())
}

/// Broadcast receiver as an SSE stream; ends when the job's channel closes
fn log_events(
    rx: broadcast::Receiver<LogEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = match Event::default().event("log").json_data(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!("Failed to encode log event: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok(frame), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    let notice = Event::default()
                        .event("lagged")
                        .data(format!("{} log event(s) skipped", skipped));
                    return Some((Ok(notice), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// POST /jobs/{id}/queue
/// Move a job between the backlog and rework queues
pub async fn move_to_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    req: Result<Json<MoveToQueue>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let Json(req) = req?;
    tracing::info!("Moving job {} to {} queue", id, req.queue_type.as_str());

    let job = job_service::move_to_queue(&state.pool, id, req.org_id, req.queue_type).await?;

    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use shipwright_core::domain::log::LogLevel;

    #[tokio::test]
    async fn test_log_stream_ends_when_channel_closes() {
        let (tx, rx) = broadcast::channel(8);
        let job_id = Uuid::new_v4();
        tx.send(LogEvent::new(job_id, "setup", LogLevel::Info, "npm ci"))
            .unwrap();
        tx.send(LogEvent::new(job_id, "setup", LogLevel::Success, "done"))
            .unwrap();
        drop(tx);

        let frames: Vec<_> = log_events(rx).collect().await;
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_notice() {
        let (tx, rx) = broadcast::channel(1);
        let job_id = Uuid::new_v4();
        for i in 0..3 {
            tx.send(LogEvent::new(job_id, "build", LogLevel::Info, format!("line {}", i)))
                .unwrap();
        }
        drop(tx);

        // one lag notice, then the single event still buffered
        let frames: Vec<_> = log_events(rx).collect().await;
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_move_to_queue_body() {
        let body: MoveToQueue = serde_json::from_value(serde_json::json!({
            "org_id": Uuid::nil(),
            "queue_type": "rework",
        }))
        .unwrap();
        assert_eq!(body.queue_type, QueueType::Rework);
    }
}
