//! Agent liveness
//!
//! A check pings the agent over its channel, waits a fixed window and then
//! reads back the agent's last observed activity. The agent is alive only if
//! that activity happened at or after the ping and is still fresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use shipwright_core::dto::channel::ChannelMessage;

use super::registry::ChannelRegistry;
use crate::workflow::ports::{AgentStore, PortError};

/// Liveness decision for a ping sent at `ping_at`
pub fn is_live(
    ping_at: DateTime<Utc>,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    freshness: Duration,
) -> bool {
    let Some(last_active) = last_active else {
        return false;
    };
    let freshness = TimeDelta::from_std(freshness).unwrap_or(TimeDelta::MAX);

    last_active >= ping_at && now - last_active <= freshness
}

pub struct LivenessChecker {
    registry: Arc<ChannelRegistry>,
    agents: Arc<dyn AgentStore>,
    wait: Duration,
    freshness: Duration,
}

impl LivenessChecker {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        agents: Arc<dyn AgentStore>,
        wait: Duration,
        freshness: Duration,
    ) -> Self {
        Self {
            registry,
            agents,
            wait,
            freshness,
        }
    }

    /// Check one agent, pausing it on failure and resetting its failure
    /// count on success
    pub async fn check(&self, agent_id: &str) -> Result<bool, PortError> {
        let live = self.probe(agent_id).await?;

        if live {
            self.agents.confirm_live(agent_id).await?;
        } else {
            tracing::warn!("Agent {} failed its liveness check, pausing it", agent_id);
            self.agents.pause(agent_id).await?;
        }

        Ok(live)
    }

    async fn probe(&self, agent_id: &str) -> Result<bool, PortError> {
        let ping_at = Utc::now();

        if let Err(e) = self
            .registry
            .send(agent_id, ChannelMessage::Ping { sent_at: ping_at })
        {
            tracing::debug!("Liveness ping not sent: {}", e);
            return Ok(false);
        }

        tokio::time::sleep(self.wait).await;

        let last_active = self
            .agents
            .get_agent(agent_id)
            .await?
            .map(|agent| agent.last_active);

        Ok(is_live(ping_at, last_active, Utc::now(), self.freshness))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryAgents;
    use super::*;
    use shipwright_core::domain::agent::AgentStatus;
    use tokio::sync::mpsc;

    const FRESHNESS: Duration = Duration::from_secs(10);

    #[test]
    fn test_activity_after_ping_is_live() {
        let ping_at = Utc::now();
        let now = ping_at + TimeDelta::seconds(5);

        assert!(is_live(ping_at, Some(ping_at + TimeDelta::seconds(2)), now, FRESHNESS));
        assert!(is_live(ping_at, Some(ping_at), now, FRESHNESS));
    }

    #[test]
    fn test_stale_activity_is_not_live() {
        let ping_at = Utc::now();
        let now = ping_at + TimeDelta::seconds(5);

        assert!(!is_live(ping_at, Some(ping_at - TimeDelta::seconds(5)), now, FRESHNESS));
        assert!(!is_live(ping_at, None, now, FRESHNESS));

        // after the ping but no longer fresh
        let late = ping_at + TimeDelta::seconds(30);
        assert!(!is_live(ping_at, Some(ping_at + TimeDelta::seconds(1)), late, FRESHNESS));
    }

    #[tokio::test]
    async fn test_agent_without_channel_is_paused() {
        let agents = Arc::new(MemoryAgents::with_agent("agent-1", Utc::now()));
        let checker = LivenessChecker::new(
            Arc::new(ChannelRegistry::new()),
            agents.clone(),
            Duration::from_millis(10),
            FRESHNESS,
        );

        assert!(!checker.check("agent-1").await.unwrap());

        let agent = agents.agent("agent-1");
        assert_eq!(agent.status, AgentStatus::Offline);
        assert_eq!(agent.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_answering_agent_is_live() {
        let stale = Utc::now() - TimeDelta::seconds(60);
        let agents = Arc::new(MemoryAgents::with_agent("agent-1", stale));
        agents.agents.lock().unwrap().get_mut("agent-1").unwrap().consecutive_failures = 2;
        let registry = Arc::new(ChannelRegistry::new());

        // stands in for the channel task: every inbound message counts as activity
        let (tx, mut rx) = mpsc::channel(4);
        registry.register("agent-1", tx);
        let answering = agents.clone();
        tokio::spawn(async move {
            while let Some(ChannelMessage::Ping { .. }) = rx.recv().await {
                answering
                    .record_activity("agent-1", Utc::now())
                    .await
                    .unwrap();
            }
        });

        let checker = LivenessChecker::new(
            registry,
            agents.clone(),
            Duration::from_millis(50),
            FRESHNESS,
        );

        assert!(checker.check("agent-1").await.unwrap());
        assert_eq!(agents.agent("agent-1").consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_silent_agent_is_not_live() {
        let stale = Utc::now() - TimeDelta::seconds(5);
        let agents = Arc::new(MemoryAgents::with_agent("agent-1", stale));
        let registry = Arc::new(ChannelRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        registry.register("agent-1", tx);

        let checker = LivenessChecker::new(
            registry,
            agents.clone(),
            Duration::from_millis(10),
            FRESHNESS,
        );

        assert!(!checker.check("agent-1").await.unwrap());
        assert_eq!(agents.agent("agent-1").status, AgentStatus::Offline);
    }
}
