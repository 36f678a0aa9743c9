//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod error;
pub mod health;
pub mod job;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::service::log_service::JobBroadcast;
use crate::transport::ChannelRegistry;
use crate::workflow::ports::AgentStore;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<ChannelRegistry>,
    pub agents: Arc<dyn AgentStore>,
    pub broadcast: Arc<JobBroadcast>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Agent endpoints
        .route("/agents/register", post(agent::register_agent))
        .route("/agents/{id}/channel", get(agent::agent_channel))
        // Job endpoints
        .route("/jobs/{id}/logs", get(job::get_job_logs))
        .route("/jobs/{id}/logs/stream", get(job::stream_job_logs))
        .route("/jobs/{id}/queue", post(job::move_to_queue))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
