//! Agent channel endpoint
//!
//! Server side of the long-lived websocket each agent keeps open. Messages
//! queued through the [`ChannelRegistry`] are written to the socket; every
//! inbound frame counts as agent activity.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use shipwright_core::dto::channel::ChannelMessage;
use tokio::sync::mpsc;

use super::registry::ChannelRegistry;
use crate::workflow::ports::AgentStore;

/// Outbound messages buffered per agent
const OUTBOUND_CAPACITY: usize = 32;

/// Serve one agent connection until either side closes it
pub async fn serve_channel(
    socket: WebSocket,
    agent_id: String,
    registry: Arc<ChannelRegistry>,
    agents: Arc<dyn AgentStore>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut outbound) = mpsc::channel(OUTBOUND_CAPACITY);
    let handle = registry.register(&agent_id, tx);

    record_activity(agents.as_ref(), &agent_id).await;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // replaced by a newer connection or dropped after a failed send
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode channel message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    tracing::warn!(agent_id = %agent_id, "Channel write failed: {}", e);
                    break;
                }
            }
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!(agent_id = %agent_id, "Channel read failed: {}", e);
                        break;
                    }
                    None => break,
                };

                record_activity(agents.as_ref(), &agent_id).await;

                match frame {
                    Message::Text(text) => handle_inbound(&agent_id, text.as_str()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    registry.unregister(&handle);
    tracing::debug!(agent_id = %agent_id, "Channel session ended");
}

async fn record_activity(agents: &dyn AgentStore, agent_id: &str) {
    if let Err(e) = agents.record_activity(agent_id, Utc::now()).await {
        tracing::warn!(agent_id, "Failed to record agent activity: {}", e);
    }
}

fn handle_inbound(agent_id: &str, text: &str) {
    match serde_json::from_str::<ChannelMessage>(text) {
        Ok(ChannelMessage::Pong { ping_sent_at, at }) => {
            let latency = at - ping_sent_at;
            tracing::debug!(agent_id, "Pong received ({} ms)", latency.num_milliseconds());
        }
        Ok(ChannelMessage::Notice { message }) => {
            tracing::info!(agent_id, "Agent notice: {}", message);
        }
        Ok(ChannelMessage::Ping { .. }) => {
            tracing::debug!(agent_id, "Ignoring ping from agent");
        }
        Err(e) => tracing::warn!(agent_id, "Malformed channel message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::liveness::testing::MemoryAgents;
    use axum::{Router, extract::Path, extract::State, extract::WebSocketUpgrade, routing::get};
    use chrono::TimeDelta;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    type TestState = (Arc<ChannelRegistry>, Arc<MemoryAgents>);

    async fn upgrade(
        ws: WebSocketUpgrade,
        Path(agent_id): Path<String>,
        State((registry, agents)): State<TestState>,
    ) -> axum::response::Response {
        ws.on_upgrade(move |socket| serve_channel(socket, agent_id, registry, agents))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_channel_relays_pings_and_records_activity() {
        let stale = Utc::now() - TimeDelta::seconds(60);
        let registry = Arc::new(ChannelRegistry::new());
        let agents = Arc::new(MemoryAgents::with_agent("agent-1", stale));

        let app = Router::new()
            .route("/agents/{id}/channel", get(upgrade))
            .with_state((registry.clone(), agents.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/agents/agent-1/channel", addr))
                .await
                .unwrap();

        wait_until(|| registry.is_connected("agent-1")).await;
        assert!(agents.agent("agent-1").last_active > stale);

        let sent_at = Utc::now();
        registry
            .send("agent-1", ChannelMessage::Ping { sent_at })
            .unwrap();
        let ping = loop {
            match socket.next().await.unwrap().unwrap() {
                ClientMessage::Text(text) => break text,
                _ => continue,
            }
        };
        assert_eq!(
            serde_json::from_str::<ChannelMessage>(ping.as_str()).unwrap(),
            ChannelMessage::Ping { sent_at }
        );

        let pong = serde_json::to_string(&ChannelMessage::Pong {
            ping_sent_at: sent_at,
            at: Utc::now(),
        })
        .unwrap();
        socket.send(ClientMessage::Text(pong.into())).await.unwrap();
        wait_until(|| agents.agent("agent-1").last_active >= sent_at).await;

        socket.close(None).await.unwrap();
        wait_until(|| !registry.is_connected("agent-1")).await;
    }
}
