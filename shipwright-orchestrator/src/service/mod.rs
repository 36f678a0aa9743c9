//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod agent;
pub mod job;
pub mod log;

// Re-export for convenience
pub use agent as agent_service;
pub use job as job_service;
pub use log as log_service;
