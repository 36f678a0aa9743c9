//! Agent transport
//!
//! The per-agent websocket channel, the registry of open channels and the
//! liveness check built on top of them. Step calls themselves go through
//! `shipwright_client::AgentClient`.

pub mod channel;
pub mod liveness;
pub mod registry;

pub use liveness::LivenessChecker;
pub use registry::ChannelRegistry;
