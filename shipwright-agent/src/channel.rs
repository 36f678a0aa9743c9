//! Control-plane channel
//!
//! Long-lived websocket to the orchestrator. The orchestrator pushes pings
//! through it to decide whether this agent is alive; every ping is answered
//! with a pong. The connection is re-established with capped exponential
//! backoff whenever it drops.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use shipwright_core::dto::channel::ChannelMessage;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode channel message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct ChannelClient {
    url: String,
    agent_id: String,
}

impl ChannelClient {
    pub fn new(url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Keep the channel open for the lifetime of the process
    pub async fn run(self) {
        let mut delay = INITIAL_BACKOFF;

        loop {
            match self.session().await {
                Ok(answered) => {
                    info!(agent_id = %self.agent_id, "Channel closed by orchestrator");
                    if answered > 0 {
                        delay = INITIAL_BACKOFF;
                    }
                }
                Err(e) => warn!(agent_id = %self.agent_id, "Channel error: {}", e),
            }

            debug!("Reconnecting channel in {:?}", delay);
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// One connection, until the orchestrator closes it. Returns the number
    /// of pings answered.
    pub async fn session(&self) -> Result<usize, ChannelError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        info!(agent_id = %self.agent_id, "Channel connected to {}", self.url);

        let (mut sink, mut stream) = socket.split();
        let mut answered = 0;

        while let Some(message) = stream.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let message = match serde_json::from_str::<ChannelMessage>(text.as_str()) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Ignoring malformed channel message: {}", e);
                    continue;
                }
            };

            if let Some(reply) = answer(&message) {
                let json = serde_json::to_string(&reply)?;
                sink.send(Message::Text(json.into())).await?;
                answered += 1;
            }
        }

        Ok(answered)
    }
}

/// Reply owed for an inbound message, if any
pub fn answer(message: &ChannelMessage) -> Option<ChannelMessage> {
    match message {
        ChannelMessage::Ping { sent_at } => Some(ChannelMessage::Pong {
            ping_sent_at: *sent_at,
            at: Utc::now(),
        }),
        ChannelMessage::Notice { message } => {
            info!("Orchestrator notice: {}", message);
            None
        }
        ChannelMessage::Pong { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_only_pings_are_answered() {
        let sent_at = Utc::now();
        match answer(&ChannelMessage::Ping { sent_at }) {
            Some(ChannelMessage::Pong { ping_sent_at, .. }) => assert_eq!(ping_sent_at, sent_at),
            other => panic!("unexpected reply {:?}", other),
        }

        assert!(answer(&ChannelMessage::Notice { message: "hi".to_string() }).is_none());
        assert!(
            answer(&ChannelMessage::Pong {
                ping_sent_at: sent_at,
                at: sent_at
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_session_answers_ping_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sent_at = Utc::now();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let garbage = Message::Text("not json".into());
            socket.send(garbage).await.unwrap();
            let ping = serde_json::to_string(&ChannelMessage::Ping { sent_at }).unwrap();
            socket.send(Message::Text(ping.into())).await.unwrap();

            let reply = loop {
                match socket.next().await.unwrap().unwrap() {
                    Message::Text(text) => break text,
                    _ => continue,
                }
            };
            socket.close(None).await.unwrap();
            serde_json::from_str::<ChannelMessage>(reply.as_str()).unwrap()
        });

        let client = ChannelClient::new(format!("ws://{}", addr), "agent-1");
        let answered = client.session().await.unwrap();
        assert_eq!(answered, 1);

        match server.await.unwrap() {
            ChannelMessage::Pong { ping_sent_at, .. } => assert_eq!(ping_sent_at, sent_at),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
