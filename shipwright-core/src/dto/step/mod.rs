//! Step execution DTOs
//!
//! A step is invoked with a [`StepRequest`]; the agent answers with a
//! newline-delimited stream of [`StepFrame`]s that ends with exactly one
//! `result` (or `error`) frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::credentials::{CoderCredentials, GitCredentials};
use crate::domain::log::LogEvent;
use crate::domain::repo::RepoRef;
use crate::domain::step::Step;
use crate::dto::error::RemoteError;

/// Request to run one pipeline step on an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub step: Step,
    pub repos: Vec<RepoRef>,
    #[serde(default)]
    pub credentials: StepCredentials,
    /// Task prompt, required by `execute`
    pub prompt: Option<String>,
}

/// Credentials a step may need
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepCredentials {
    /// Git credentials keyed by repository id
    #[serde(default)]
    pub git: HashMap<String, GitCredentials>,
    pub coder: Option<CoderCredentials>,
}

/// Outcome of a step that ran to completion.
///
/// A failed report ("I ran but tests failed") is a normal answer, not a
/// transport error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StepReport {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }

    /// Errors joined into a single line
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// One line of a streamed step response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepFrame {
    Log(LogEvent),
    Heartbeat { at: DateTime<Utc> },
    Result(StepReport),
    Error(RemoteError),
}

impl StepFrame {
    /// Whether this frame ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepFrame::Result(_) | StepFrame::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::log::LogLevel;

    #[test]
    fn test_frames_are_tagged_by_type() {
        let log = StepFrame::Log(LogEvent::new(
            Uuid::new_v4(),
            "setup",
            LogLevel::Info,
            "npm ci",
        ));
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["level"], "info");
        assert_eq!(json["stage"], "setup");

        let result = StepFrame::Result(StepReport::failed(vec!["boom".to_string()]));
        let json = serde_json::to_string(&result).unwrap();
        let decoded: StepFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, result);
        assert!(decoded.is_terminal());
    }

    #[test]
    fn test_step_request_defaults_credentials() {
        let json = serde_json::json!({
            "job_id": Uuid::new_v4(),
            "org_id": Uuid::new_v4(),
            "step": "setup",
            "repos": [],
            "prompt": null
        });
        let req: StepRequest = serde_json::from_value(json).unwrap();
        assert!(req.credentials.git.is_empty());
        assert!(req.credentials.coder.is_none());
    }
}
