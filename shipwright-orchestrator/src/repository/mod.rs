//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod agent;
pub mod history;
pub mod job;
pub mod log;
pub mod repo_config;

// Re-export for convenience
pub use agent as agent_repository;
pub use history as history_repository;
pub use job as job_repository;
pub use log as log_repository;
pub use repo_config as repo_config_repository;
