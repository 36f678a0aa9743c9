//! Repository Configuration Repository
//!
//! Read-only access to per-org repository settings (URL, base branch,
//! setup/build/test commands).

use std::collections::HashMap;

use shipwright_core::domain::repo::RepoConfig;
use sqlx::PgPool;
use uuid::Uuid;

/// Configurations for the given repository ids, keyed by id
///
/// Unknown ids are simply absent from the map.
pub async fn find_many(
    pool: &PgPool,
    org_id: Uuid,
    repo_ids: &[String],
) -> Result<HashMap<String, RepoConfig>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepoConfigRow>(
        r#"
        SELECT repo_id, name, url, base_branch, setup_commands, build_commands,
               test_commands, is_confirmed
        FROM repo_configs
        WHERE org_id = $1 AND repo_id = ANY($2)
        "#,
    )
    .bind(org_id)
    .bind(repo_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.repo_id.clone();
            (id, row.into())
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct RepoConfigRow {
    repo_id: String,
    name: String,
    url: String,
    base_branch: Option<String>,
    setup_commands: Option<String>,
    build_commands: Option<String>,
    test_commands: Option<String>,
    is_confirmed: bool,
}

impl From<RepoConfigRow> for RepoConfig {
    fn from(row: RepoConfigRow) -> Self {
        RepoConfig {
            name: row.name,
            url: row.url,
            base_branch: row.base_branch,
            setup_commands: row.setup_commands,
            build_commands: row.build_commands,
            test_commands: row.test_commands,
            is_confirmed: row.is_confirmed,
        }
    }
}
