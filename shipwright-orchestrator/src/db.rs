use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            version INTEGER NOT NULL DEFAULT 1,
            org_id UUID NOT NULL,
            status VARCHAR(32) NOT NULL,
            queue_type VARCHAR(16) NOT NULL DEFAULT 'backlog',
            order_in_queue INTEGER NOT NULL DEFAULT 0,
            prompt TEXT NOT NULL,
            repos JSONB NOT NULL DEFAULT '[]',
            pr_links TEXT[] NOT NULL DEFAULT '{}',
            agent_id VARCHAR(255),
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single active execution lane per org
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_lane ON jobs(org_id) WHERE status = 'in-progress'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_queue ON jobs(status, order_in_queue, created_at)",
    )
    .execute(pool)
    .await?;

    // Create repository configuration table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_configs (
            org_id UUID NOT NULL,
            repo_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            url TEXT NOT NULL,
            base_branch VARCHAR(255),
            setup_commands TEXT,
            build_commands TEXT,
            test_commands TEXT,
            is_confirmed BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (org_id, repo_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create agents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id VARCHAR(255) PRIMARY KEY,
            host VARCHAR(255) NOT NULL,
            port INTEGER NOT NULL,
            status VARCHAR(16) NOT NULL,
            last_active TIMESTAMPTZ NOT NULL,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            registered_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)")
        .execute(pool)
        .await?;

    // Create logs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_logs (
            id BIGSERIAL PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            version INTEGER NOT NULL,
            org_id UUID NOT NULL,
            stage VARCHAR(32) NOT NULL,
            level VARCHAR(16) NOT NULL,
            message TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_logs_job_id ON job_logs(job_id, id)")
        .execute(pool)
        .await?;

    // Create workflow history table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_history (
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            version INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            name VARCHAR(64) NOT NULL,
            outcome JSONB NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (job_id, version, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
