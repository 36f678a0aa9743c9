//! Bidirectional channel messages
//!
//! Exchanged as JSON text frames over the long-lived websocket between the
//! orchestrator and each agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Health-check ping pushed by the orchestrator
    Ping { sent_at: DateTime<Utc> },

    /// Agent's answer to a ping
    Pong {
        ping_sent_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Out-of-band notice pushed by either side
    Notice { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_format() {
        let sent_at = Utc::now();
        let json = serde_json::to_value(ChannelMessage::Ping { sent_at }).unwrap();
        assert_eq!(json["type"], "ping");

        let decoded: ChannelMessage = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, ChannelMessage::Ping { sent_at });
    }
}
