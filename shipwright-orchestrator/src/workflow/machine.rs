//! Job workflow
//!
//! Sequencing and failure policy for one job:
//!
//! `Started → CredentialsFetched → Checkout → Setup → Execute → Build → Verify
//! → PRCreation → Cleanup → {Completed | Failed}`
//!
//! Start, credential and checkout failures are fatal and jump straight to
//! cleanup. Setup, execute, build and verify failures are recorded and the
//! workflow keeps going so a partially broken job still yields a reviewable
//! pull request. Cleanup runs exactly once on every path and never fails the
//! workflow.

use std::sync::Arc;
use std::time::Duration;

use shipwright_core::domain::job::JobStatus;
use shipwright_core::domain::log::LogLevel;
use shipwright_core::domain::step::Step;

use super::activities::{Activities, Completion, JobKey, JobPlan};
use super::durable::{ActivityOptions, RetryPolicy, WorkflowContext, WorkflowError};
use super::pr::{pr_body, pr_title};

const STAGE: &str = "workflow";

/// Steps run after checkout; their failures do not abort the job
const RECOVERABLE_STEPS: [Step; 4] = [Step::Setup, Step::Execute, Step::Build, Step::Validate];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Started,
    CredentialsFetched,
    Checkout,
    Setup,
    Execute,
    Build,
    Verify,
    PrCreation,
    Cleanup,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Started => "Started",
            WorkflowState::CredentialsFetched => "CredentialsFetched",
            WorkflowState::Checkout => "Checkout",
            WorkflowState::Setup => "Setup",
            WorkflowState::Execute => "Execute",
            WorkflowState::Build => "Build",
            WorkflowState::Verify => "Verify",
            WorkflowState::PrCreation => "PRCreation",
            WorkflowState::Cleanup => "Cleanup",
            WorkflowState::Completed => "Completed",
            WorkflowState::Failed => "Failed",
        }
    }

    fn for_step(step: Step) -> Self {
        match step {
            Step::Checkout => WorkflowState::Checkout,
            Step::Setup => WorkflowState::Setup,
            Step::Execute => WorkflowState::Execute,
            Step::Build => WorkflowState::Build,
            Step::Validate => WorkflowState::Verify,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished workflow decided
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub state: WorkflowState,
    pub status: JobStatus,
    pub pr_links: Vec<String>,
    /// Fatal error, if any, followed by every recoverable step failure
    pub errors: Vec<String>,
}

#[derive(Default)]
struct Progress {
    fatal: Option<String>,
    step_errors: Vec<String>,
    verification_failed: bool,
    pr_links: Vec<String>,
}

impl Progress {
    fn fail(&mut self, message: String) {
        self.fatal.get_or_insert(message);
    }

    fn errors(&self) -> Vec<String> {
        self.fatal
            .iter()
            .chain(self.step_errors.iter())
            .cloned()
            .collect()
    }
}

/// Activity failures are part of the policy; substrate errors abort the run
fn activity_failure(err: WorkflowError) -> Result<String, WorkflowError> {
    match err.activity_message() {
        Some(message) => Ok(message.to_string()),
        None => Err(err),
    }
}

pub struct JobWorkflow {
    activities: Arc<dyn Activities>,
    step_options: ActivityOptions,
    call_options: ActivityOptions,
}

impl JobWorkflow {
    pub fn new(
        activities: Arc<dyn Activities>,
        step_options: ActivityOptions,
        call_options: ActivityOptions,
    ) -> Self {
        Self {
            activities,
            step_options,
            call_options,
        }
    }

    /// Options for the short non-step calls (status updates, PRs, cleanup)
    pub fn default_call_options() -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_secs(120),
            heartbeat_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Drive the job to a terminal state.
    ///
    /// Returns `Err` only when the durable substrate itself fails (history
    /// unavailable, divergent replay) or the final status update cannot be
    /// written; the run can then be resumed from its history.
    pub async fn run(
        &self,
        ctx: &mut WorkflowContext,
        key: &JobKey,
    ) -> Result<JobOutcome, WorkflowError> {
        let mut progress = Progress::default();

        self.advance(ctx, key, &mut progress).await?;

        self.enter(ctx, WorkflowState::Cleanup);
        match ctx
            .execute("cleanup", &self.call_options, |_| {
                self.activities.cleanup(key)
            })
            .await
        {
            Ok(report) if report.is_clean() => {
                ctx.log(
                    STAGE,
                    LogLevel::Info,
                    format!("Workspace cleaned up ({} worktree(s) removed)", report.worktrees_removed),
                )
                .await;
            }
            Ok(report) => {
                let mut problems = report.errors.clone();
                problems.extend(
                    report
                        .unresolved_worktrees
                        .iter()
                        .map(|w| format!("unresolved worktree {}", w)),
                );
                ctx.log(
                    STAGE,
                    LogLevel::Warn,
                    format!("Cleanup finished with problems: {}", problems.join("; ")),
                )
                .await;
            }
            Err(e) => {
                let message = activity_failure(e)?;
                ctx.log(STAGE, LogLevel::Warn, format!("Cleanup failed: {}", message))
                    .await;
            }
        }

        let failed = progress.fatal.is_some() || progress.verification_failed;
        let (state, status) = if failed {
            (WorkflowState::Failed, JobStatus::Failed)
        } else {
            (WorkflowState::Completed, JobStatus::Completed)
        };
        let errors = progress.errors();

        let completion = Completion {
            status,
            pr_link: progress.pr_links.first().cloned(),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };
        ctx.execute("complete", &self.call_options, |_| {
            self.activities.complete(key, &completion)
        })
        .await?;

        self.enter(ctx, state);
        if failed {
            ctx.log(
                STAGE,
                LogLevel::Error,
                format!("Job failed: {}", errors.join("; ")),
            )
            .await;
        } else {
            ctx.log(STAGE, LogLevel::Success, "Job completed").await;
        }

        Ok(JobOutcome {
            state,
            status,
            pr_links: progress.pr_links,
            errors,
        })
    }

    /// Everything before cleanup. Returns early on a fatal error.
    async fn advance(
        &self,
        ctx: &mut WorkflowContext,
        key: &JobKey,
        progress: &mut Progress,
    ) -> Result<(), WorkflowError> {
        self.enter(ctx, WorkflowState::Started);
        let plan: JobPlan = match ctx
            .execute("start_job", &self.call_options, |_| {
                self.activities.start_job(key)
            })
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                let message = format!("Failed to start job: {}", activity_failure(e)?);
                self.fatal(ctx, progress, message).await;
                return Ok(());
            }
        };
        ctx.log(
            STAGE,
            LogLevel::Info,
            format!(
                "Job started for {} repositor{}",
                plan.repos.len(),
                if plan.repos.len() == 1 { "y" } else { "ies" }
            ),
        )
        .await;

        self.enter(ctx, WorkflowState::CredentialsFetched);
        match ctx
            .execute("fetch_credentials", &self.call_options, |_| {
                self.activities.fetch_credentials(&plan)
            })
            .await
        {
            Ok(summary) => {
                ctx.log(
                    STAGE,
                    LogLevel::Info,
                    format!(
                        "Credentials available for {} repositor{}",
                        summary.git_repos.len(),
                        if summary.git_repos.len() == 1 { "y" } else { "ies" }
                    ),
                )
                .await;
            }
            Err(e) => {
                let message = format!("Credential retrieval failed: {}", activity_failure(e)?);
                self.fatal(ctx, progress, message).await;
                return Ok(());
            }
        }

        self.enter(ctx, WorkflowState::Checkout);
        match self.run_step(ctx, &plan, Step::Checkout).await? {
            None => {}
            Some(errors) => {
                let message = format!("{} step failed: {}", Step::Checkout.label(), errors);
                self.fatal(ctx, progress, message).await;
                return Ok(());
            }
        }

        for step in RECOVERABLE_STEPS {
            self.enter(ctx, WorkflowState::for_step(step));
            if let Some(errors) = self.run_step(ctx, &plan, step).await? {
                let message = format!("{} step failed: {}", step.label(), errors);
                ctx.log(STAGE, LogLevel::Error, message.clone()).await;
                progress.step_errors.push(message);
                if step != Step::Execute {
                    progress.verification_failed = true;
                }
            }
        }

        self.enter(ctx, WorkflowState::PrCreation);
        self.create_prs(ctx, &plan, progress).await
    }

    /// `None` on success, otherwise the failure summary
    async fn run_step(
        &self,
        ctx: &mut WorkflowContext,
        plan: &JobPlan,
        step: Step,
    ) -> Result<Option<String>, WorkflowError> {
        let result = ctx
            .execute(step.as_str(), &self.step_options, |heartbeat| {
                self.activities.run_step(plan, step, heartbeat)
            })
            .await;

        match result {
            Ok(report) if report.success => Ok(None),
            Ok(report) => Ok(Some(report.error_summary())),
            Err(e) => Ok(Some(activity_failure(e)?)),
        }
    }

    async fn create_prs(
        &self,
        ctx: &mut WorkflowContext,
        plan: &JobPlan,
        progress: &mut Progress,
    ) -> Result<(), WorkflowError> {
        if plan.repos.is_empty() {
            ctx.log(STAGE, LogLevel::Info, "No repositories configured, skipping pull requests")
                .await;
            return Ok(());
        }

        let title = pr_title(&plan.prompt);
        let body = pr_body(&plan.prompt, plan.key.job_id, &progress.step_errors);

        for repo in &plan.repos {
            let name = format!("create_pr:{}", repo.repo_id);
            let result = ctx
                .execute(&name, &self.call_options, |_| {
                    self.activities.create_pr(plan, repo, &title, &body)
                })
                .await;

            match result {
                Ok(url) => {
                    ctx.log(
                        STAGE,
                        LogLevel::Success,
                        format!("Opened pull request for {}: {}", repo.name, url),
                    )
                    .await;
                    progress.pr_links.push(url);
                }
                Err(e) => {
                    let message = format!(
                        "PR creation failed for {}: {}",
                        repo.name,
                        activity_failure(e)?
                    );
                    ctx.log(STAGE, LogLevel::Error, message.clone()).await;
                    progress.fail(message);
                }
            }
        }

        Ok(())
    }

    async fn fatal(&self, ctx: &WorkflowContext, progress: &mut Progress, message: String) {
        ctx.log(STAGE, LogLevel::Error, message.clone()).await;
        progress.fail(message);
    }

    fn enter(&self, ctx: &WorkflowContext, state: WorkflowState) {
        let key = ctx.key();
        tracing::debug!(job_id = %key.job_id, version = key.version, "Workflow state: {}", state);
    }
}
