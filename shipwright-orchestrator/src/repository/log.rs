//! Log Repository
//!
//! Handles all database operations related to job logs.

use chrono::{DateTime, Utc};
use shipwright_core::domain::log::{LogEvent, LogLevel};
use sqlx::PgPool;
use uuid::Uuid;

/// Append one event to a job's log
pub async fn append(
    pool: &PgPool,
    version: i32,
    org_id: Uuid,
    event: &LogEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, version, org_id, stage, level, message, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.job_id)
    .bind(version)
    .bind(org_id)
    .bind(&event.stage)
    .bind(event.level.as_str())
    .bind(&event.message)
    .bind(event.timestamp)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get all log events for a job, in insertion order
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEvent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT job_id, stage, level, message, timestamp
        FROM job_logs
        WHERE job_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    job_id: Uuid,
    stage: String,
    level: String,
    message: String,
    timestamp: DateTime<Utc>,
}

impl From<LogRow> for LogEvent {
    fn from(row: LogRow) -> Self {
        LogEvent {
            level: row.level.parse().unwrap_or(LogLevel::Info),
            message: row.message,
            timestamp: row.timestamp,
            job_id: row.job_id,
            stage: row.stage,
        }
    }
}
