//! Job Repository
//!
//! Handles all database operations related to jobs.

use chrono::{DateTime, Utc};
use shipwright_core::domain::job::{Job, JobStatus, QueueType};
use shipwright_core::domain::repo::RepoRef;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, version, org_id, status, queue_type, order_in_queue, prompt,
               repos, pr_links, agent_id, error_message, created_at, updated_at
        FROM jobs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a job by ID, scoped to its org
pub async fn find_for_org(pool: &PgPool, id: Uuid, org_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, version, org_id, status, queue_type, order_in_queue, prompt,
               repos, pr_links, agent_id, error_message, created_at, updated_at
        FROM jobs
        WHERE id = $1 AND org_id = $2
        "#,
    )
    .bind(id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Jobs that were running on an agent when the orchestrator stopped
pub async fn find_in_progress_with_agent(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, version, org_id, status, queue_type, order_in_queue, prompt,
               repos, pr_links, agent_id, error_message, created_at, updated_at
        FROM jobs
        WHERE status = 'in-progress' AND agent_id IS NOT NULL
        ORDER BY updated_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Atomically bind the next runnable queued job to an agent
///
/// Picks the lowest `order_in_queue` among orgs that have no job in
/// progress. Concurrent claimers skip each other's locked rows; if two
/// claims still race for the same org the unique lane index rejects one of
/// them, which is reported as "nothing to claim".
pub async fn claim_next(pool: &PgPool, agent_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let claimed = sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE jobs
        SET status = 'in-progress', agent_id = $1, updated_at = $2
        WHERE id = (
            SELECT j.id
            FROM jobs j
            WHERE j.status = 'queued'
              AND NOT EXISTS (
                  SELECT 1 FROM jobs busy
                  WHERE busy.org_id = j.org_id AND busy.status = 'in-progress'
              )
            ORDER BY j.order_in_queue ASC, j.created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, version, org_id, status, queue_type, order_in_queue, prompt,
                  repos, pr_links, agent_id, error_message, created_at, updated_at
        "#,
    )
    .bind(agent_id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await;

    match claimed {
        Ok(row) => Ok(row.map(|r| r.into())),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Update status, optionally recording a PR link and an error message
pub async fn update_status(
    pool: &PgPool,
    job_id: Uuid,
    org_id: Uuid,
    status: JobStatus,
    pr_link: Option<&str>,
    error_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1,
            pr_links = CASE
                WHEN $2::TEXT IS NULL OR $2 = ANY(pr_links) THEN pr_links
                ELSE array_append(pr_links, $2::TEXT)
            END,
            error_message = COALESCE($3, error_message),
            updated_at = $4
        WHERE id = $5 AND org_id = $6
        "#,
    )
    .bind(status.as_str())
    .bind(pr_link)
    .bind(error_message)
    .bind(Utc::now())
    .bind(job_id)
    .bind(org_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Change the queue a job waits in, returning the previous queue
pub async fn set_queue_type(
    pool: &PgPool,
    job_id: Uuid,
    org_id: Uuid,
    queue_type: QueueType,
) -> Result<Option<QueueType>, sqlx::Error> {
    let previous: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE jobs AS j
        SET queue_type = $1, updated_at = $2
        FROM (SELECT id, queue_type FROM jobs WHERE id = $3 AND org_id = $4 FOR UPDATE) AS old
        WHERE j.id = old.id
        RETURNING old.queue_type
        "#,
    )
    .bind(queue_type.as_str())
    .bind(Utc::now())
    .bind(job_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    Ok(previous.map(|(q,)| q.parse().unwrap_or(QueueType::Backlog)))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    version: i32,
    org_id: Uuid,
    status: String,
    queue_type: String,
    order_in_queue: i32,
    prompt: String,
    repos: Json<Vec<RepoRef>>,
    pr_links: Vec<String>,
    agent_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|e| {
            tracing::warn!("Job {}: {}, treating as draft", row.id, e);
            JobStatus::Draft
        });

        Job {
            id: row.id,
            version: row.version,
            org_id: row.org_id,
            status,
            queue_type: row.queue_type.parse().unwrap_or(QueueType::Backlog),
            order_in_queue: row.order_in_queue,
            prompt: row.prompt,
            repos: row.repos.0,
            pr_links: row.pr_links,
            agent_id: row.agent_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
