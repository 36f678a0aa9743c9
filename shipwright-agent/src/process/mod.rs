//! Code-generation tool supervision
//!
//! - `events`: the tool's line-delimited JSON event shapes
//! - `session`: running state and log lines derived from those events
//! - `supervisor`: spawning, timeouts, authentication detection and draining

pub mod events;
pub mod session;
mod supervisor;

pub use supervisor::{CoderInvocation, ProcessSupervisor, SupervisorConfig};

/// Variable the tool reads its API key from
pub const API_KEY_ENV: &str = "CURSOR_API_KEY";
