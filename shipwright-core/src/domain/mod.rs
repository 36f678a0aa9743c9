//! Core domain types
//!
//! This module contains the core domain structures used across Shipwright services.
//! They are shared between the orchestrator (which owns and persists them) and
//! the agent (which receives the parts it needs to execute a step).

pub mod agent;
pub mod credentials;
pub mod job;
pub mod log;
pub mod repo;
pub mod step;
