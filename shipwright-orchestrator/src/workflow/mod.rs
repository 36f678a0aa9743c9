//! Job workflow
//!
//! The durable state machine that drives one job through its steps on a
//! remote agent, together with the collaborator interfaces it depends on.

pub mod activities;
pub mod durable;
pub mod logger;
pub mod machine;
pub mod ports;
pub mod pr;

pub use activities::{Activities, JobKey, JobPlan, RemoteActivities};
pub use durable::{ActivityOptions, HistoryStore, WorkflowContext, WorkflowError, WorkflowKey};
pub use logger::JobLogger;
pub use machine::{JobOutcome, JobWorkflow, WorkflowState};
