//! Pipeline step types

use serde::{Deserialize, Serialize};

/// One unit of the execution pipeline run on an agent.
///
/// Closed set: the agent dispatches on it with a single exhaustive match, so
/// adding a step is a compile-time-checked change on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Checkout,
    Setup,
    Execute,
    Build,
    Validate,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Checkout => "checkout",
            Step::Setup => "setup",
            Step::Execute => "execute",
            Step::Build => "build",
            Step::Validate => "validate",
        }
    }

    /// Human-readable label used in failure summaries ("Setup step failed")
    pub fn label(&self) -> &'static str {
        match self {
            Step::Checkout => "Checkout",
            Step::Setup => "Setup",
            Step::Execute => "Execute",
            Step::Build => "Build",
            Step::Validate => "Verify",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
