//! Agent configuration
//!
//! Defines all configurable parameters for the agent: its identity and
//! address, workspace location, code-generation tool settings, timeouts,
//! pull request settings and the cleanup allow-lists.

use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
///
/// All timeouts are configurable so tests and slow hosts can tune them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this agent instance
    pub agent_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// Interface the RPC server binds to
    pub bind_addr: String,

    /// Host the orchestrator should use to reach this agent
    pub advertise_host: String,

    /// Port of the RPC server
    pub port: u16,

    /// Root for bare repositories and per-job worktrees
    pub workspace_root: PathBuf,

    /// Code-generation tool executable (overridable per job by credentials)
    pub coder_executable: String,

    /// Time the tool has to produce its first output line
    pub coder_startup_timeout: Duration,

    /// Hard ceiling on one tool run
    pub coder_overall_timeout: Duration,

    /// Ceiling on one setup/build/test command
    pub command_timeout: Duration,

    /// Ceiling on one git invocation
    pub git_timeout: Duration,

    /// Interval between heartbeat frames on a running step stream
    pub step_heartbeat_interval: Duration,

    /// GitHub REST API base URL
    pub github_api_url: String,

    /// Author used for job commits
    pub git_author_name: String,
    pub git_author_email: String,

    /// Process names killed (exact match) during cleanup
    pub cleanup_kill_processes: Vec<String>,

    /// Paths removed during cleanup; `{job_id}` is replaced with the job id
    pub cleanup_paths: Vec<String>,

    /// Environment variables cleared from the job environment during cleanup
    pub cleanup_env_vars: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(agent_id: String, orchestrator_url: String) -> Self {
        Self {
            agent_id,
            orchestrator_url,
            bind_addr: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            port: 9090,
            workspace_root: PathBuf::from("/var/lib/shipwright"),
            coder_executable: "cursor-agent".to_string(),
            coder_startup_timeout: Duration::from_secs(30),
            coder_overall_timeout: Duration::from_secs(600), // 10 minutes
            command_timeout: Duration::from_secs(1200),
            git_timeout: Duration::from_secs(300),
            step_heartbeat_interval: Duration::from_secs(30),
            github_api_url: "https://api.github.com".to_string(),
            git_author_name: "Shipwright".to_string(),
            git_author_email: "shipwright@localhost".to_string(),
            cleanup_kill_processes: vec!["cursor-agent".to_string()],
            cleanup_paths: vec!["/tmp/shipwright-{job_id}".to_string()],
            cleanup_env_vars: vec!["CURSOR_API_KEY".to_string()],
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - AGENT_BIND_ADDR (optional, default: 0.0.0.0)
    /// - AGENT_ADVERTISE_HOST (optional, default: 127.0.0.1)
    /// - AGENT_PORT (optional, default: 9090)
    /// - WORKSPACE_ROOT (optional, default: /var/lib/shipwright)
    /// - CODER_EXECUTABLE (optional, default: cursor-agent)
    /// - CODER_STARTUP_TIMEOUT (optional, seconds, default: 30)
    /// - CODER_OVERALL_TIMEOUT (optional, seconds, default: 600)
    /// - COMMAND_TIMEOUT (optional, seconds, default: 1200)
    /// - GIT_TIMEOUT (optional, seconds, default: 300)
    /// - STEP_HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - GITHUB_API_URL (optional, default: https://api.github.com)
    /// - GIT_AUTHOR_NAME / GIT_AUTHOR_EMAIL (optional)
    /// - CLEANUP_KILL_PROCESSES / CLEANUP_PATHS / CLEANUP_ENV_VARS
    ///   (optional, comma-separated)
    pub fn from_env() -> anyhow::Result<Self> {
        let agent_id = std::env::var("AGENT_ID")
            .map_err(|_| anyhow::anyhow!("AGENT_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let defaults = Self::new(agent_id, orchestrator_url);

        let port = std::env::var("AGENT_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        Ok(Self {
            bind_addr: env_string("AGENT_BIND_ADDR", &defaults.bind_addr),
            advertise_host: env_string("AGENT_ADVERTISE_HOST", &defaults.advertise_host),
            port,
            workspace_root: std::env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| defaults.workspace_root.clone()),
            coder_executable: env_string("CODER_EXECUTABLE", &defaults.coder_executable),
            coder_startup_timeout: env_secs("CODER_STARTUP_TIMEOUT", defaults.coder_startup_timeout),
            coder_overall_timeout: env_secs("CODER_OVERALL_TIMEOUT", defaults.coder_overall_timeout),
            command_timeout: env_secs("COMMAND_TIMEOUT", defaults.command_timeout),
            git_timeout: env_secs("GIT_TIMEOUT", defaults.git_timeout),
            step_heartbeat_interval: env_secs(
                "STEP_HEARTBEAT_INTERVAL",
                defaults.step_heartbeat_interval,
            ),
            github_api_url: env_string("GITHUB_API_URL", &defaults.github_api_url),
            git_author_name: env_string("GIT_AUTHOR_NAME", &defaults.git_author_name),
            git_author_email: env_string("GIT_AUTHOR_EMAIL", &defaults.git_author_email),
            cleanup_kill_processes: env_list("CLEANUP_KILL_PROCESSES")
                .unwrap_or_else(|| defaults.cleanup_kill_processes.clone()),
            cleanup_paths: env_list("CLEANUP_PATHS")
                .unwrap_or_else(|| defaults.cleanup_paths.clone()),
            cleanup_env_vars: env_list("CLEANUP_ENV_VARS")
                .unwrap_or_else(|| defaults.cleanup_env_vars.clone()),
            ..defaults
        })
    }

    /// Address the RPC server listens on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.is_empty() {
            anyhow::bail!("agent_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.coder_executable.is_empty() {
            anyhow::bail!("coder_executable cannot be empty");
        }

        if self.coder_startup_timeout.is_zero() || self.coder_overall_timeout.is_zero() {
            anyhow::bail!("coder timeouts must be greater than 0");
        }

        if self.coder_startup_timeout > self.coder_overall_timeout {
            anyhow::bail!("coder_startup_timeout cannot exceed coder_overall_timeout");
        }

        if self.step_heartbeat_interval.is_zero() {
            anyhow::bail!("step_heartbeat_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| parse_list(&raw))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.coder_startup_timeout, Duration::from_secs(30));
        assert_eq!(config.coder_overall_timeout, Duration::from_secs(600));
        assert_eq!(config.listen_addr(), "0.0.0.0:9090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty agent_id should fail
        config.agent_id = String::new();
        assert!(config.validate().is_err());

        config.agent_id = "test".to_string();

        // Invalid URL should fail
        config.orchestrator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.orchestrator_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());

        // Startup window longer than the overall ceiling should fail
        config.coder_startup_timeout = Duration::from_secs(900);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" cursor-agent, node ,,"),
            vec!["cursor-agent".to_string(), "node".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}
