//! Credential types
//!
//! Credentials are minted and stored elsewhere; these types only carry them
//! to the executor. `Debug` output never contains the secret values.

use serde::{Deserialize, Serialize};

/// Token-based Git credentials for one repository
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCredentials {
    pub token: String,
    pub username: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// How the code-generation tool authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoderAuthKind {
    /// Explicit API key injected into the tool's environment
    ApiKey,
    /// Ambient session auth already present on the agent host
    Session,
}

/// Credentials for the code-generation tool
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderCredentials {
    #[serde(rename = "type")]
    pub kind: CoderAuthKind,
    pub executable_path: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for CoderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoderCredentials")
            .field("kind", &self.kind)
            .field("executable_path", &self.executable_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_redacts_secrets() {
        let git = GitCredentials {
            token: "ghp_secret".to_string(),
            username: "bot".to_string(),
        };
        let coder = CoderCredentials {
            kind: CoderAuthKind::ApiKey,
            executable_path: None,
            api_key: Some("sk-secret".to_string()),
        };

        assert!(!format!("{:?}", git).contains("ghp_secret"));
        assert!(!format!("{:?}", coder).contains("sk-secret"));
        assert!(format!("{:?}", git).contains("bot"));
    }
}
