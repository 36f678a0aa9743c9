//! Job Service
//!
//! Queue bookkeeping for jobs.

use shipwright_core::domain::job::{Job, QueueType};
use shipwright_core::domain::log::{LogEvent, LogLevel};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{job_repository, log_repository};

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(Uuid),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Get a job by ID
pub async fn get_job(pool: &PgPool, id: Uuid, org_id: Uuid) -> Result<Job> {
    job_repository::find_for_org(pool, id, org_id)
        .await?
        .ok_or(JobError::NotFound(id))
}

/// Move a job between the backlog and rework queues.
///
/// Only the queue type changes; the job keeps its position. The move is
/// recorded in the job's log.
pub async fn move_to_queue(
    pool: &PgPool,
    job_id: Uuid,
    org_id: Uuid,
    queue_type: QueueType,
) -> Result<Job> {
    let previous = job_repository::set_queue_type(pool, job_id, org_id, queue_type)
        .await?
        .ok_or(JobError::NotFound(job_id))?;

    let job = get_job(pool, job_id, org_id).await?;

    if previous != queue_type {
        let event = LogEvent::new(
            job_id,
            "queue",
            LogLevel::Info,
            queue_move_message(previous, queue_type),
        );
        log_repository::append(pool, job.version, org_id, &event).await?;
        tracing::info!("Job {} moved from {} to {}", job_id, previous.as_str(), queue_type.as_str());
    }

    Ok(job)
}

fn queue_move_message(from: QueueType, to: QueueType) -> String {
    format!("Moved from {} queue to {} queue", from.as_str(), to.as_str())
}
