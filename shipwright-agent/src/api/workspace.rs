//! Workspace API Handlers
//!
//! Pull request creation, job cleanup and the health probe.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::Utc;
use shipwright_core::dto::agent::AgentHealth;
use shipwright_core::dto::pr::{CreatePrRequest, CreatePrResponse};
use shipwright_core::dto::workspace::{CleanupReport, CleanupRequest};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /pr
/// Commit, push and open a pull request for one repository of a job
pub async fn create_pr(
    State(state): State<AppState>,
    payload: Result<Json<CreatePrRequest>, JsonRejection>,
) -> ApiResult<Json<CreatePrResponse>> {
    let Json(request) = payload?;
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("pull request title is empty".to_string()));
    }

    tracing::info!(job_id = %request.job_id, "Creating pull request for {}", request.repo.name);

    let url = state.publisher.publish(&request).await?;
    Ok(Json(CreatePrResponse { url }))
}

/// POST /workspace/cleanup
/// Best-effort teardown; failures are listed in the report
pub async fn cleanup(
    State(state): State<AppState>,
    payload: Result<Json<CleanupRequest>, JsonRejection>,
) -> ApiResult<Json<CleanupReport>> {
    let Json(request) = payload?;
    Ok(Json(state.cleaner.cleanup(request.job_id).await))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<AgentHealth> {
    Json(AgentHealth {
        agent_id: state.config.agent_id.clone(),
        busy_steps: state.busy.count(),
        timestamp: Utc::now(),
    })
}
