//! Step Executor
//!
//! Receives one pipeline step for a job and performs it against the job's
//! worktrees:
//! - `checkout`: shared bare repository + fresh worktree per repo
//! - `execute`: job branch per repo, then one code-generation tool run
//! - `setup` / `build` / `validate`: the repo-supplied command lists
//!
//! Progress is streamed through a [`StepLogger`] as it happens. Every repo is
//! attempted even when an earlier one fails; the report carries the union of
//! errors.

pub mod cleanup;
pub mod commands;
pub mod environment;
pub mod logger;
pub mod pr;

use std::sync::Arc;

use shipwright_core::domain::credentials::{CoderAuthKind, CoderCredentials};
use shipwright_core::domain::repo::{RepoRef, job_branch_name, split_commands};
use shipwright_core::domain::step::Step;
use shipwright_core::dto::step::{StepReport, StepRequest};

use crate::git::WorktreeManager;
use crate::process::{API_KEY_ENV, CoderInvocation, ProcessSupervisor};
use commands::CommandRunner;
use environment::JobEnvironment;
use logger::StepLogger;

pub struct StepExecutor {
    worktrees: Arc<WorktreeManager>,
    commands: CommandRunner,
    supervisor: ProcessSupervisor,
    environment: JobEnvironment,
}

impl StepExecutor {
    pub fn new(
        worktrees: Arc<WorktreeManager>,
        commands: CommandRunner,
        supervisor: ProcessSupervisor,
        environment: JobEnvironment,
    ) -> Self {
        Self {
            worktrees,
            commands,
            supervisor,
            environment,
        }
    }

    /// Run one step to completion
    pub async fn run_step(&self, request: &StepRequest, logger: &StepLogger) -> StepReport {
        logger
            .info(format!(
                "Starting {} for {} repositor{}",
                request.step,
                request.repos.len(),
                if request.repos.len() == 1 { "y" } else { "ies" }
            ))
            .await;

        let report = match request.step {
            Step::Checkout => self.checkout(request, logger).await,
            Step::Setup => {
                self.run_repo_commands(request, logger, |r| r.setup_commands.as_deref())
                    .await
            }
            Step::Execute => self.execute(request, logger).await,
            Step::Build => {
                self.run_repo_commands(request, logger, |r| r.build_commands.as_deref())
                    .await
            }
            Step::Validate => {
                self.run_repo_commands(request, logger, |r| r.test_commands.as_deref())
                    .await
            }
        };

        if report.success {
            logger.success(format!("{} step succeeded", request.step.label())).await;
        } else {
            logger
                .error(format!(
                    "{} step failed: {}",
                    request.step.label(),
                    report.error_summary()
                ))
                .await;
        }

        report
    }

    async fn checkout(&self, request: &StepRequest, logger: &StepLogger) -> StepReport {
        let mut errors = Vec::new();

        for repo in &request.repos {
            let credentials = request.credentials.git.get(&repo.repo_id);
            if credentials.is_none() {
                logger
                    .warn(format!("No Git credentials for {}, cloning anonymously", repo.name))
                    .await;
            }

            let checked_out = async {
                logger.info(format!("Preparing shared repository for {}", repo.name)).await;
                let bare = self
                    .worktrees
                    .ensure_bare_repo(&repo.repo_id, &repo.url, credentials)
                    .await?;
                self.worktrees
                    .refresh_bare_repo(&bare, &repo.url, credentials)
                    .await?;

                let worktree = self.worktrees.layout().worktree_path(request.job_id, &repo.name);
                logger
                    .info(format!("Creating worktree for {} at {}", repo.name, repo.base_branch))
                    .await;
                self.worktrees
                    .create_worktree(&bare, &worktree, &repo.base_branch)
                    .await
            }
            .await;

            match checked_out {
                Ok(()) => logger.success(format!("Checked out {}", repo.name)).await,
                Err(e) => {
                    logger.error(format!("Checkout of {} failed: {}", repo.name, e)).await;
                    errors.push(format!("{}: {}", repo.name, e));
                }
            }
        }

        report_from(errors)
    }

    async fn execute(&self, request: &StepRequest, logger: &StepLogger) -> StepReport {
        let Some(prompt) = request.prompt.as_deref().filter(|p| !p.trim().is_empty()) else {
            return StepReport::failed(vec!["execute requires a prompt".to_string()]);
        };

        let mut errors = Vec::new();
        let mut branched = 0;

        for repo in &request.repos {
            let worktree = self.worktrees.layout().worktree_path(request.job_id, &repo.name);
            if !worktree.exists() {
                errors.push(format!("{}: worktree missing, was checkout run?", repo.name));
                continue;
            }

            let branch = job_branch_name(request.job_id, &repo.name);
            match self.worktrees.create_branch(&worktree, &branch).await {
                Ok(()) => {
                    branched += 1;
                    logger.info(format!("Switched {} to branch {}", repo.name, branch)).await;
                }
                Err(e) => {
                    logger.error(format!("Could not create branch in {}: {}", repo.name, e)).await;
                    errors.push(format!("{}: {}", repo.name, e));
                }
            }
        }

        if branched == 0 {
            if errors.is_empty() {
                errors.push("no repositories to work on".to_string());
            }
            return StepReport::failed(errors);
        }

        let coder = request.credentials.coder.as_ref();
        self.prepare_environment(request, coder);

        let invocation = CoderInvocation {
            workspace: &self.worktrees.layout().job_dir(request.job_id),
            prompt,
            executable: coder.and_then(|c| c.executable_path.as_deref()),
            env: self.environment.snapshot(request.job_id),
        };

        if let Err(e) = self.supervisor.run(invocation, logger).await {
            errors.push(e.to_string());
        }

        report_from(errors)
    }

    fn prepare_environment(&self, request: &StepRequest, coder: Option<&CoderCredentials>) {
        if let Some(CoderCredentials {
            kind: CoderAuthKind::ApiKey,
            api_key: Some(key),
            ..
        }) = coder
        {
            self.environment.set(request.job_id, API_KEY_ENV, key.clone());
        }
    }

    async fn run_repo_commands<F>(
        &self,
        request: &StepRequest,
        logger: &StepLogger,
        select: F,
    ) -> StepReport
    where
        F: Fn(&RepoRef) -> Option<&str>,
    {
        let mut errors = Vec::new();

        for repo in &request.repos {
            let commands = split_commands(select(repo));
            if commands.is_empty() {
                logger
                    .info(format!("No {} commands configured for {}", request.step, repo.name))
                    .await;
                continue;
            }

            let worktree = self.worktrees.layout().worktree_path(request.job_id, &repo.name);
            if !worktree.exists() {
                errors.push(format!("{}: worktree missing, was checkout run?", repo.name));
                continue;
            }

            for command in &commands {
                if let Err(e) = self.commands.run(command, &worktree, logger).await {
                    logger.error(format!("{}: {}", repo.name, e)).await;
                    errors.push(format!("{}: {}", repo.name, e));
                    break;
                }
            }
        }

        report_from(errors)
    }
}

fn report_from(errors: Vec<String>) -> StepReport {
    if errors.is_empty() {
        StepReport::succeeded()
    } else {
        StepReport::failed(errors)
    }
}
