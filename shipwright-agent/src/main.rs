//! Shipwright Agent
//!
//! Executes pipeline steps for the orchestrator on this machine.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - API: RPC server the orchestrator drives (steps, PRs, cleanup, health)
//! - Executor: step dispatch, repo commands, cleanup and PR publication
//! - Git: shared bare repositories and per-job worktrees
//! - Process: supervision of the code-generation tool
//! - Channel: websocket the orchestrator uses for liveness checks
//!
//! On startup the agent registers itself with the orchestrator, opens its
//! channel and then serves RPCs until stopped.

mod api;
mod channel;
mod config;
mod executor;
mod git;
mod process;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::api::steps::BusySteps;
use crate::channel::ChannelClient;
use crate::config::Config;
use crate::executor::StepExecutor;
use crate::executor::cleanup::WorkspaceCleaner;
use crate::executor::commands::CommandRunner;
use crate::executor::environment::JobEnvironment;
use crate::executor::pr::PullRequestPublisher;
use crate::git::{WorkspaceLayout, WorktreeManager};
use crate::process::{ProcessSupervisor, SupervisorConfig};
use shipwright_client::ControlPlaneClient;
use shipwright_core::dto::agent::RegisterAgent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipwright_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shipwright Agent");

    let mut config = load_config()?;
    config.workspace_root = std::path::absolute(&config.workspace_root)
        .context("Failed to resolve workspace root")?;
    tokio::fs::create_dir_all(&config.workspace_root)
        .await
        .with_context(|| format!("Failed to create {}", config.workspace_root.display()))?;

    info!(
        "Loaded configuration: agent_id={}, orchestrator_url={}, workspace_root={}",
        config.agent_id,
        config.orchestrator_url,
        config.workspace_root.display()
    );

    let state = build_state(config.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr()))?;
    info!("Listening on {}", config.listen_addr());

    // Register with the orchestrator (with retry logic)
    let control_plane = ControlPlaneClient::new(config.orchestrator_url.clone());
    register_with_retry(&control_plane, &config).await?;
    info!("Registered with orchestrator");

    let channel_url = control_plane.channel_url(&config.agent_id)?;
    tokio::spawn(ChannelClient::new(channel_url, config.agent_id.clone()).run());

    if let Err(e) = axum::serve(listener, api::create_router(state)).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

fn build_state(config: Config) -> AppState {
    let worktrees = Arc::new(WorktreeManager::new(
        WorkspaceLayout::new(&config.workspace_root),
        config.git_timeout,
    ));
    let environment = JobEnvironment::new();

    let executor = StepExecutor::new(
        worktrees.clone(),
        CommandRunner::new(config.command_timeout),
        ProcessSupervisor::new(SupervisorConfig::new(
            config.coder_executable.clone(),
            config.coder_startup_timeout,
            config.coder_overall_timeout,
        )),
        environment.clone(),
    );

    AppState {
        publisher: Arc::new(PullRequestPublisher::new(&config, worktrees.clone())),
        cleaner: Arc::new(WorkspaceCleaner::new(&config, worktrees, environment)),
        executor: Arc::new(executor),
        busy: BusySteps::default(),
        config: Arc::new(config),
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Register with orchestrator with retry logic and exponential backoff
///
/// The orchestrator may not be ready yet when the agent starts (common in
/// container environments).
async fn register_with_retry(client: &ControlPlaneClient, config: &Config) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let request = RegisterAgent {
        agent_id: config.agent_id.clone(),
        host: config.advertise_host.clone(),
        port: config.port,
    };

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.register_agent(&request).await {
            Ok(agent) => {
                if attempt > 1 {
                    info!(
                        "Successfully registered with orchestrator after {} attempt(s)",
                        attempt
                    );
                }
                info!("Orchestrator knows this agent at {}", agent.base_url());
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES || !e.is_transient() {
                    error!(
                        "Failed to register with orchestrator after {} attempt(s)",
                        attempt
                    );
                    return Err(anyhow::anyhow!(
                        "Failed to register with orchestrator: {}",
                        e
                    ));
                }

                warn!(
                    "Failed to register with orchestrator (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
