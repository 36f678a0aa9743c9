//! Job dispatcher
//!
//! Periodically binds queued jobs to live agents and runs each job's
//! workflow in its own task. Jobs left in progress by a previous process (or
//! by a workflow that stopped on a substrate error) are resumed from their
//! recorded history on the same agent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Context as AnyhowContext, Result};
use futures_util::future::join_all;
use shipwright_core::domain::agent::AgentStatus;
use shipwright_core::domain::job::Job;
use sqlx::PgPool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::repository::{agent_repository, job_repository};
use crate::service::log_service::JobBroadcast;
use crate::store::PgStore;
use crate::transport::LivenessChecker;
use crate::workflow::ports::{AgentStore, CredentialProvider};
use crate::workflow::{
    ActivityOptions, JobKey, JobLogger, JobOutcome, JobWorkflow, RemoteActivities,
    WorkflowContext, WorkflowError, WorkflowKey,
};

/// Agents with a workflow currently running on them
#[derive(Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Reserve the agent; `None` if it is already busy
    pub fn try_claim(&self, agent_id: &str) -> Option<InFlightGuard> {
        let mut agents = self.0.lock().unwrap_or_else(|e| e.into_inner());
        agents.insert(agent_id.to_string()).then(|| InFlightGuard {
            in_flight: self.clone(),
            agent_id: agent_id.to_string(),
        })
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(agent_id)
    }
}

/// Releases the agent when dropped
pub struct InFlightGuard {
    in_flight: InFlight,
    agent_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.agent_id);
    }
}

/// Everything a spawned workflow task needs
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<PgStore>,
    credentials: Arc<dyn CredentialProvider>,
    broadcast: Arc<JobBroadcast>,
    step_options: ActivityOptions,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<PgStore>,
        credentials: Arc<dyn CredentialProvider>,
        broadcast: Arc<JobBroadcast>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            credentials,
            broadcast,
            step_options: ActivityOptions::step(
                config.step_start_to_close_timeout,
                config.step_heartbeat_timeout,
            ),
        }
    }

    /// Run (or resume) one job's workflow on the agent it is bound to
    pub async fn run_job(&self, job: Job, agent_id: String) {
        if let Err(e) = self.store.set_status(&agent_id, AgentStatus::Active).await {
            warn!("Failed to mark agent {} active: {}", agent_id, e);
        }

        match self.execute(&job, &agent_id).await {
            Ok(outcome) => info!(
                "Job {} finished as {} with {} pull request(s)",
                job.id,
                outcome.status.as_str(),
                outcome.pr_links.len()
            ),
            Err(e) => error!("Workflow for job {} stopped: {}", job.id, e),
        }

        if let Err(e) = self.store.set_status(&agent_id, AgentStatus::Idle).await {
            warn!("Failed to mark agent {} idle: {}", agent_id, e);
        }
        self.broadcast.close(job.id);
    }

    async fn execute(&self, job: &Job, agent_id: &str) -> Result<JobOutcome, WorkflowError> {
        let logger = JobLogger::new(
            job.id,
            job.version,
            job.org_id,
            self.store.clone(),
            self.broadcast.clone(),
        );
        let activities = RemoteActivities::new(
            self.store.clone(),
            self.store.clone(),
            self.credentials.clone(),
            self.store.clone(),
            logger.clone(),
        );
        let workflow = JobWorkflow::new(
            Arc::new(activities),
            self.step_options.clone(),
            JobWorkflow::default_call_options(),
        );

        let key = JobKey {
            job_id: job.id,
            org_id: job.org_id,
            version: job.version,
            agent_id: agent_id.to_string(),
        };
        let mut ctx = WorkflowContext::load(
            WorkflowKey {
                job_id: job.id,
                version: job.version,
            },
            self.store.clone(),
            logger,
        )
        .await?;

        workflow.run(&mut ctx, &key).await
    }
}

pub struct Dispatcher {
    pool: PgPool,
    interval: Duration,
    liveness: LivenessChecker,
    runner: WorkflowRunner,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        config: &Config,
        liveness: LivenessChecker,
        runner: WorkflowRunner,
    ) -> Self {
        Self {
            pool,
            interval: config.dispatch_interval,
            liveness,
            runner,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_workflows)),
            in_flight: InFlight::default(),
        }
    }

    /// Starts the dispatch loop
    pub async fn run(&self) {
        info!("Starting dispatcher (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.dispatch_once().await {
                Ok(started) => {
                    if started > 0 {
                        info!("Started {} workflow(s) this cycle", started);
                    }
                }
                Err(e) => {
                    error!("Error during dispatch cycle: {:#}", e);
                }
            }
        }
    }

    /// Performs a single dispatch cycle, returning the number of workflows
    /// started
    pub async fn dispatch_once(&self) -> Result<usize> {
        if self.semaphore.available_permits() == 0 {
            debug!("All workflow slots busy");
            return Ok(0);
        }

        let orphaned: Vec<(Job, InFlightGuard)> =
            job_repository::find_in_progress_with_agent(&self.pool)
                .await
                .context("Failed to list in-progress jobs")?
                .into_iter()
                .filter_map(|job| {
                    let guard = self.in_flight.try_claim(job.agent_id.as_deref()?)?;
                    Some((job, guard))
                })
                .collect();

        let idle: Vec<InFlightGuard> = agent_repository::list_schedulable(&self.pool)
            .await
            .context("Failed to list agents")?
            .into_iter()
            .filter_map(|agent| self.in_flight.try_claim(&agent.id))
            .collect();

        if orphaned.is_empty() && idle.is_empty() {
            debug!("No agents available");
            return Ok(0);
        }

        let agent_ids: Vec<&str> = orphaned
            .iter()
            .map(|(_, guard)| guard.agent_id.as_str())
            .chain(idle.iter().map(|guard| guard.agent_id.as_str()))
            .collect();
        let checks = join_all(agent_ids.iter().map(|id| self.liveness.check(id))).await;
        let live: HashSet<String> = agent_ids
            .iter()
            .zip(checks)
            .filter_map(|(id, check)| match check {
                Ok(true) => Some(id.to_string()),
                Ok(false) => None,
                Err(e) => {
                    warn!("Liveness check for agent {} failed: {}", id, e);
                    None
                }
            })
            .collect();

        let mut started = 0;

        for (job, guard) in orphaned {
            if !live.contains(&guard.agent_id) {
                continue;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max concurrent workflows reached");
                return Ok(started);
            };
            info!("Resuming job {} on agent {}", job.id, guard.agent_id);
            self.spawn_workflow(job, guard, permit);
            started += 1;
        }

        for guard in idle {
            if !live.contains(&guard.agent_id) {
                continue;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max concurrent workflows reached");
                break;
            };
            let Some(job) = job_repository::claim_next(&self.pool, &guard.agent_id)
                .await
                .context("Failed to claim a job")?
            else {
                debug!("No queued jobs for agent {}", guard.agent_id);
                continue;
            };
            info!("Job {} claimed by agent {}", job.id, guard.agent_id);
            self.spawn_workflow(job, guard, permit);
            started += 1;
        }

        Ok(started)
    }

    /// Spawns a task running a single job's workflow
    fn spawn_workflow(&self, job: Job, guard: InFlightGuard, permit: OwnedSemaphorePermit) {
        let runner = self.runner.clone();

        tokio::spawn(async move {
            let agent_id = guard.agent_id.clone();
            runner.run_job(job, agent_id).await;
            // Guard and permit are released when dropped
            drop(guard);
            drop(permit);
        });
    }
}
