//! Health Check API Handler
//!
//! Liveness of the orchestrator itself, with the number of agents holding an
//! open channel.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connected_agents: usize,
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        connected_agents: state.registry.connected_count(),
    })
}
