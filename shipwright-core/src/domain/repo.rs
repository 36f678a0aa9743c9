//! Repository domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base branch used when a repository does not configure one
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// A repository a job operates on.
///
/// Supplied by the (external) repository configuration; read-only to the
/// execution pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub repo_id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Semicolon-delimited commands
    pub setup_commands: Option<String>,
    pub build_commands: Option<String>,
    pub test_commands: Option<String>,
    #[serde(default)]
    pub is_confirmed: bool,
}

fn default_base_branch() -> String {
    DEFAULT_BASE_BRANCH.to_string()
}

/// Per-repository configuration as returned by `GetRepoConfigs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    pub base_branch: Option<String>,
    pub setup_commands: Option<String>,
    pub build_commands: Option<String>,
    pub test_commands: Option<String>,
    pub is_confirmed: bool,
}

impl RepoConfig {
    /// Combines the configuration with its repository id into a [`RepoRef`]
    pub fn into_repo_ref(self, repo_id: impl Into<String>) -> RepoRef {
        RepoRef {
            repo_id: repo_id.into(),
            name: self.name,
            url: self.url,
            base_branch: self
                .base_branch
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(default_base_branch),
            setup_commands: self.setup_commands,
            build_commands: self.build_commands,
            test_commands: self.test_commands,
            is_confirmed: self.is_confirmed,
        }
    }
}

/// Replaces every character that is not ASCII alphanumeric, `-` or `_` with `-`.
///
/// Deterministic, so the same logical name always maps to the same path
/// component or ref name.
pub fn sanitize_component(raw: &str) -> String {
    let sanitized: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "repo".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Name of the branch a job creates in a repository.
///
/// Derived only from `(job_id, repo_name)` so the executor and PR creation
/// agree on it without sharing state.
pub fn job_branch_name(job_id: Uuid, repo_name: &str) -> String {
    let simple = job_id.simple().to_string();
    format!("shipwright/{}-{}", &simple[..8], sanitize_component(repo_name))
}

/// Splits a semicolon-delimited command list, dropping blank entries.
///
/// Commands are never invented: `None` or a blank string yields an empty list.
pub fn split_commands(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("org/repo"), "org-repo");
        assert_eq!(sanitize_component("My Repo.git"), "My-Repo-git");
        assert_eq!(sanitize_component("///"), "repo");
        assert_eq!(sanitize_component("a_b-c"), "a_b-c");
    }

    #[test]
    fn test_job_branch_name_is_deterministic() {
        let job_id = Uuid::parse_str("0b6f4a2e-1111-2222-3333-444455556666").unwrap();
        let first = job_branch_name(job_id, "web app");
        let second = job_branch_name(job_id, "web app");
        assert_eq!(first, second);
        assert_eq!(first, "shipwright/0b6f4a2e-web-app");
    }

    #[test]
    fn test_split_commands() {
        assert_eq!(
            split_commands(Some("npm ci; npm run build ;;")),
            vec!["npm ci".to_string(), "npm run build".to_string()]
        );
        assert!(split_commands(Some("  ")).is_empty());
        assert!(split_commands(None).is_empty());
    }

    #[test]
    fn test_repo_config_defaults_base_branch() {
        let config = RepoConfig {
            name: "a".to_string(),
            url: "https://github.com/org/a.git".to_string(),
            base_branch: Some(" ".to_string()),
            setup_commands: None,
            build_commands: None,
            test_commands: None,
            is_confirmed: true,
        };
        let repo = config.into_repo_ref("org/a");
        assert_eq!(repo.base_branch, DEFAULT_BASE_BRANCH);
        assert_eq!(repo.repo_id, "org/a");
    }
}
