//! Agent API Handlers
//!
//! Self-registration and the long-lived agent channel.

use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade, rejection::JsonRejection},
    response::Response,
};
use shipwright_core::domain::agent::Agent;
use shipwright_core::dto::agent::RegisterAgent;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::agent_service;
use crate::transport::channel::serve_channel;

/// POST /agents/register
/// Register (or re-register) an agent; it becomes idle
pub async fn register_agent(
    State(state): State<AppState>,
    req: Result<Json<RegisterAgent>, JsonRejection>,
) -> ApiResult<Json<Agent>> {
    let Json(req) = req?;
    tracing::info!("Registering agent: {}", req.agent_id);

    let agent = agent_service::register_agent(&state.pool, req).await?;

    Ok(Json(agent))
}

/// GET /agents/{id}/channel
/// Websocket upgrade for the agent's bidirectional channel
pub async fn agent_channel(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    // unknown agents must register first
    agent_service::get_agent(&state.pool, &agent_id).await?;

    Ok(ws.on_upgrade(move |socket| {
        serve_channel(socket, agent_id, state.registry, state.agents)
    }))
}
