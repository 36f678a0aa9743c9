//! Channel registry
//!
//! Owns the sender half of every agent's open channel, keyed by agent id.
//! Each registration gets a generation number so a replaced connection
//! cannot unregister its successor when it shuts down.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use shipwright_core::dto::channel::ChannelMessage;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("agent {0} has no open channel")]
    NotConnected(String),

    #[error("channel to agent {0} failed and was closed")]
    Closed(String),
}

/// Proof of a registration, needed to unregister it
#[derive(Debug)]
pub struct ChannelHandle {
    agent_id: String,
    generation: u64,
}

impl ChannelHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

struct Registration {
    generation: u64,
    tx: mpsc::Sender<ChannelMessage>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Registration>>,
    next_generation: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent's channel, replacing any previous one
    pub fn register(&self, agent_id: &str, tx: mpsc::Sender<ChannelMessage>) -> ChannelHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());

        if channels
            .insert(agent_id.to_string(), Registration { generation, tx })
            .is_some()
        {
            tracing::info!("Replaced channel for agent {}", agent_id);
        } else {
            tracing::info!("Channel opened for agent {}", agent_id);
        }

        ChannelHandle {
            agent_id: agent_id.to_string(),
            generation,
        }
    }

    /// Remove the registration if it is still the current one
    pub fn unregister(&self, handle: &ChannelHandle) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get(&handle.agent_id) {
            Some(current) if current.generation == handle.generation => {
                channels.remove(&handle.agent_id);
                tracing::info!("Channel closed for agent {}", handle.agent_id);
                true
            }
            _ => false,
        }
    }

    /// Queue a message for the agent without waiting.
    ///
    /// A channel that cannot take the message is closed and removed.
    pub fn send(&self, agent_id: &str, message: ChannelMessage) -> Result<(), RegistryError> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let registration = channels
            .get(agent_id)
            .ok_or_else(|| RegistryError::NotConnected(agent_id.to_string()))?;

        if let Err(e) = registration.tx.try_send(message) {
            tracing::warn!("Dropping channel for agent {}: {}", agent_id, e);
            channels.remove(agent_id);
            return Err(RegistryError::Closed(agent_id.to_string()));
        }

        Ok(())
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(agent_id)
            .is_some_and(|registration| !registration.tx.is_closed())
    }

    pub fn connected_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
