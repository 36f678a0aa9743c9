//! Shipwright Core
//!
//! Core types and abstractions shared by the Shipwright control plane and
//! its remote step executors.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, RepoRef, Agent, LogEvent, Step)
//! - DTOs: Payloads exchanged between the orchestrator and agents

pub mod domain;
pub mod dto;
