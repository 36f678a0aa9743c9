//! Agent Repository
//!
//! Handles all database operations related to agents.

use chrono::{DateTime, Utc};
use shipwright_core::domain::agent::{Agent, AgentStatus};
use shipwright_core::dto::agent::RegisterAgent;
use sqlx::PgPool;

/// Create or update an agent registration
///
/// Re-registering refreshes the address and clears any paused state.
pub async fn register(pool: &PgPool, req: &RegisterAgent) -> Result<Agent, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, AgentRow>(
        r#"
        INSERT INTO agents (id, host, port, status, last_active, consecutive_failures, registered_at)
        VALUES ($1, $2, $3, $4, $5, 0, $5)
        ON CONFLICT (id) DO UPDATE SET
            host = EXCLUDED.host,
            port = EXCLUDED.port,
            status = EXCLUDED.status,
            last_active = EXCLUDED.last_active,
            consecutive_failures = 0
        RETURNING id, host, port, status, last_active, consecutive_failures, registered_at
        "#,
    )
    .bind(&req.agent_id)
    .bind(&req.host)
    .bind(i32::from(req.port))
    .bind(AgentStatus::Idle.as_str())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Find an agent by ID
pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Agent>, sqlx::Error> {
    let row = sqlx::query_as::<_, AgentRow>(
        r#"
        SELECT id, host, port, status, last_active, consecutive_failures, registered_at
        FROM agents
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Agents that are not paused
pub async fn list_schedulable(pool: &PgPool) -> Result<Vec<Agent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AgentRow>(
        r#"
        SELECT id, host, port, status, last_active, consecutive_failures, registered_at
        FROM agents
        WHERE status <> 'offline'
        ORDER BY last_active DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Record activity seen on the agent's channel
pub async fn touch(pool: &PgPool, id: &str, at: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET last_active = GREATEST(last_active, $1)
        WHERE id = $2
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Pause scheduling to an agent after a failed liveness check
pub async fn mark_offline(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET status = 'offline', consecutive_failures = consecutive_failures + 1
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reset the failure counter after a passing liveness check
pub async fn mark_live(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET consecutive_failures = 0,
            status = CASE WHEN status = 'offline' THEN 'idle' ELSE status END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Set the agent's status
pub async fn set_status(pool: &PgPool, id: &str, status: AgentStatus) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE agents SET status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    host: String,
    port: i32,
    status: String,
    last_active: DateTime<Utc>,
    consecutive_failures: i32,
    registered_at: DateTime<Utc>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            status: row.status.parse().unwrap_or(AgentStatus::Offline),
            port: u16::try_from(row.port).unwrap_or_default(),
            id: row.id,
            host: row.host,
            last_active: row.last_active,
            consecutive_failures: row.consecutive_failures,
            registered_at: row.registered_at,
        }
    }
}
