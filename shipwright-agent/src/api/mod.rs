//! API Module
//!
//! RPC surface the orchestrator drives:
//! - `POST /steps/run`: streamed step execution
//! - `POST /pr`: pull request creation
//! - `POST /workspace/cleanup`: job teardown
//! - `GET /health`

pub mod error;
pub mod steps;
pub mod workspace;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::config::Config;
use crate::executor::StepExecutor;
use crate::executor::cleanup::WorkspaceCleaner;
use crate::executor::pr::PullRequestPublisher;
use steps::BusySteps;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub executor: Arc<StepExecutor>,
    pub publisher: Arc<PullRequestPublisher>,
    pub cleaner: Arc<WorkspaceCleaner>,
    pub busy: BusySteps,
}

/// Create the agent router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(workspace::health))
        .route("/steps/run", post(steps::run_step))
        .route("/pr", post(workspace::create_pr))
        .route("/workspace/cleanup", post(workspace::cleanup))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::commands::CommandRunner;
    use crate::executor::environment::JobEnvironment;
    use crate::git::{WorkspaceLayout, WorktreeManager};
    use crate::process::{ProcessSupervisor, SupervisorConfig};
    use shipwright_client::{AgentClient, ClientError};
    use shipwright_core::domain::credentials::GitCredentials;
    use shipwright_core::domain::repo::RepoRef;
    use shipwright_core::domain::step::Step;
    use shipwright_core::dto::pr::CreatePrRequest;
    use shipwright_core::dto::step::{StepCredentials, StepFrame, StepRequest};
    use shipwright_core::dto::workspace::CleanupRequest;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn state(root: &Path) -> AppState {
        let mut config = Config::default();
        config.agent_id = "agent-test".to_string();
        config.workspace_root = root.to_path_buf();
        config.cleanup_kill_processes = Vec::new();
        config.cleanup_paths = Vec::new();
        config.step_heartbeat_interval = Duration::from_millis(50);

        let worktrees = Arc::new(WorktreeManager::new(
            WorkspaceLayout::new(&config.workspace_root),
            config.git_timeout,
        ));
        let environment = JobEnvironment::new();
        let executor = StepExecutor::new(
            worktrees.clone(),
            CommandRunner::new(config.command_timeout),
            ProcessSupervisor::new(SupervisorConfig::new(
                "true",
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

    async fn serve(state: AppState) -> AgentClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        AgentClient::new(format!("http://{}", addr))
    }

    fn repo(name: &str) -> RepoRef {
        RepoRef {
            repo_id: format!("org/{}", name),
            name: name.to_string(),
            url: format!("https://github.com/org/{}.git", name),
            base_branch: "main".to_string(),
            setup_commands: None,
            build_commands: None,
            test_commands: None,
            is_confirmed: true,
        }
    }

    #[tokio::test]
    async fn test_step_streams_logs_then_result() {
        let tmp = TempDir::new().unwrap();
        let client = serve(state(tmp.path())).await;
        let job_id = Uuid::new_v4();

        let mut stream = client
            .run_step(&StepRequest {
                job_id,
                org_id: Uuid::new_v4(),
                step: Step::Validate,
                repos: vec![repo("a")],
                credentials: StepCredentials::default(),
                prompt: None,
            })
            .await
            .unwrap();

        let mut logs = Vec::new();
        let report = loop {
            match stream.next_frame().await.unwrap() {
                Some(StepFrame::Log(event)) => {
                    assert_eq!(event.job_id, job_id);
                    logs.push(event.message);
                }
                Some(StepFrame::Heartbeat { .. }) => {}
                Some(StepFrame::Result(report)) => break report,
                other => panic!("unexpected frame {:?}", other),
            }
        };

        assert!(report.success);
        assert!(logs.iter().any(|m| m == "No validate commands configured for a"));
        assert!(stream.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_step_request_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let client = serve(state(tmp.path())).await;

        let err = client
            .run_step(&StepRequest {
                job_id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
                step: Step::Setup,
                repos: vec![repo(" ")],
                credentials: StepCredentials::default(),
                prompt: None,
            })
            .await
            .err()
            .unwrap();

        match err {
            ClientError::Remote { status, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, "bad_request");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_reports_agent() {
        let tmp = TempDir::new().unwrap();
        let client = serve(state(tmp.path())).await;

        let health = client.health().await.unwrap();
        assert_eq!(health.agent_id, "agent-test");
        assert_eq!(health.busy_steps, 0);
    }

    #[tokio::test]
    async fn test_cleanup_always_answers_with_report() {
        let tmp = TempDir::new().unwrap();
        let client = serve(state(tmp.path())).await;

        let report = client
            .cleanup_workspace(&CleanupRequest {
                job_id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_pr_without_worktree_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let client = serve(state(tmp.path())).await;

        let err = client
            .create_pr(&CreatePrRequest {
                job_id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
                repo: repo("a"),
                credentials: GitCredentials {
                    token: "t".to_string(),
                    username: "bot".to_string(),
                },
                title: "Add feature".to_string(),
                body: String::new(),
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }
}
