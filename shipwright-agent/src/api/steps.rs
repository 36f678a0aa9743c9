//! Step API Handler
//!
//! `POST /steps/run` answers with a newline-delimited JSON stream of
//! [`StepFrame`]s. The step runs in its own task and pushes frames into a
//! bounded queue; the response body drains that queue as frames arrive.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::Response,
};
use chrono::Utc;
use futures_util::stream;
use shipwright_core::dto::step::{StepFrame, StepRequest};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::executor::logger::StepLogger;

const NDJSON: &str = "application/x-ndjson";

/// Number of steps currently executing
#[derive(Debug, Clone, Default)]
pub struct BusySteps(Arc<AtomicUsize>);

impl BusySteps {
    pub fn enter(&self) -> BusyGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        BusyGuard(self.0.clone())
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BusyGuard(Arc<AtomicUsize>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// POST /steps/run
/// Run one pipeline step, streaming its progress
pub async fn run_step(
    State(state): State<AppState>,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    if request.repos.iter().any(|r| r.name.trim().is_empty()) {
        return Err(ApiError::BadRequest("every repository needs a name".to_string()));
    }

    info!(job_id = %request.job_id, step = %request.step, "Step requested");

    let (logger, rx) = StepLogger::channel(request.job_id, request.step.as_str());
    let guard = state.busy.enter();
    let heartbeat_interval = state.config.step_heartbeat_interval;
    let executor = state.executor.clone();

    tokio::spawn(async move {
        let _guard = guard;
        let run = executor.run_step(&request, &logger);
        tokio::pin!(run);

        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;

        let report = loop {
            tokio::select! {
                report = &mut run => break Some(report),
                _ = heartbeat.tick() => {
                    logger.send(StepFrame::Heartbeat { at: Utc::now() }).await;
                }
                _ = logger.closed() => break None,
            }
        };

        match report {
            Some(report) => {
                info!(
                    job_id = %request.job_id,
                    step = %request.step,
                    success = report.success,
                    "Step finished"
                );
                logger.send(StepFrame::Result(report)).await;
            }
            None => warn!(
                job_id = %request.job_id,
                step = %request.step,
                "Caller went away, step abandoned"
            ),
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON)
        .body(Body::from_stream(frame_stream(rx)))
        .map_err(|e| ApiError::InternalError(e.to_string()))
}

fn frame_stream(
    rx: mpsc::Receiver<StepFrame>,
) -> impl futures_util::Stream<Item = Result<String, std::convert::Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok(encode_frame(&frame)), rx))
    })
}

fn encode_frame(frame: &StepFrame) -> String {
    let mut line = serde_json::to_string(frame).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "code": "encode_failed", "message": e.to_string() })
            .to_string()
    });
    line.push('\n');
    line
}
