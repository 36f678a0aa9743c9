//! Data Transfer Objects for inter-service communication
//!
//! This module contains the payloads exchanged between the orchestrator and
//! agents: step execution requests and their streamed frames, one-shot
//! operations (pull request creation, workspace cleanup), agent registration
//! and health, and the bidirectional channel messages.

pub mod agent;
pub mod channel;
pub mod error;
pub mod pr;
pub mod step;
pub mod workspace;
