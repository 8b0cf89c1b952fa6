//! Database migrations
//!
//! Migrations are embedded SQL files with increasing version numbers. Each
//! pending migration runs in its own transaction together with the row that
//! records it in `schema_migrations`.

use tracing::info;

use crate::db::DbClient;
use crate::error::ApiResult;

/// A migration with its version and SQL content
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("../migrations/0001_initial_schema.sql"),
}];

const CREATE_TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
     version BIGINT PRIMARY KEY, \
     name TEXT NOT NULL, \
     applied_at TIMESTAMPTZ NOT NULL DEFAULT now())";

/// Migrations newer than `current`, in order.
pub fn pending_after(current: i64) -> Vec<&'static Migration> {
    MIGRATIONS.iter().filter(|m| m.version > current).collect()
}

/// Run all pending migrations. Returns the versions applied.
pub async fn run_migrations(db: &DbClient) -> ApiResult<Vec<i64>> {
    let mut conn = db.get_conn().await?;
    conn.batch_execute(CREATE_TRACKING_TABLE).await?;

    let current: i64 = conn
        .query_one("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", &[])
        .await?
        .try_get(0)?;

    let pending = pending_after(current);
    if pending.is_empty() {
        info!("Database schema is up to date (version {})", current);
        return Ok(Vec::new());
    }

    info!(
        "Running {} migration(s) (from version {})",
        pending.len(),
        current
    );

    let mut applied = Vec::with_capacity(pending.len());
    for migration in pending {
        info!("Applying migration {}: {}", migration.version, migration.name);
        let tx = conn.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .await?;
        tx.commit().await?;
        applied.push(migration.version);
    }

    info!(
        "Migrations complete (now at version {})",
        applied.last().copied().unwrap_or(current)
    );
    Ok(applied)
}
