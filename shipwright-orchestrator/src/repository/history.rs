//! Workflow History Repository
//!
//! Append-only record of the activity calls each workflow run has completed,
//! keyed by `(job_id, version, seq)`.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// One recorded call: `(seq, name, outcome)`
pub type HistoryRow = (i32, String, serde_json::Value);

/// Recorded calls of a workflow run, in sequence order
pub async fn find_by_run(
    pool: &PgPool,
    job_id: Uuid,
    version: i32,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT seq, name, outcome
        FROM workflow_history
        WHERE job_id = $1 AND version = $2
        ORDER BY seq ASC
        "#,
    )
    .bind(job_id)
    .bind(version)
    .fetch_all(pool)
    .await
}

/// Record a call; recording the same sequence number twice keeps the first
pub async fn insert(
    pool: &PgPool,
    job_id: Uuid,
    version: i32,
    seq: i32,
    name: &str,
    outcome: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflow_history (job_id, version, seq, name, outcome, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (job_id, version, seq) DO NOTHING
        "#,
    )
    .bind(job_id)
    .bind(version)
    .bind(seq)
    .bind(name)
    .bind(outcome)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
