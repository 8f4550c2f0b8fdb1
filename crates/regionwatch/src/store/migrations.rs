use libsql::Connection;

use super::StoreResult;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Every replica runs this on startup against the shared database; all
/// statements are idempotent so concurrent starts are harmless.
pub async fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Lease and check result tables").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Range query indexes").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> StoreResult<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> StoreResult<()> {
    let now = chrono::Utc::now().timestamp();

    // Another replica may have recorded it first
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: lease rows and dedup-keyed result rows
async fn run_migration_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leases (
            name TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_results (
            key TEXT PRIMARY KEY,
            id TEXT NOT NULL,
            target TEXT NOT NULL,
            address TEXT NOT NULL,
            observed_at INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            status_code INTEGER NOT NULL,
            is_healthy INTEGER NOT NULL,
            payload TEXT,
            error_message TEXT,
            owner_id TEXT NOT NULL,
            hour_bucket INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_leases_expires_at ON leases(expires_at)", ()).await?;

    Ok(())
}

/// Migration v2: indexes backing `results_since` and `delete_results_before`
async fn run_migration_v2(conn: &Connection) -> StoreResult<()> {
    conn.execute("CREATE INDEX IF NOT EXISTS idx_check_results_observed_at ON check_results(observed_at)", ())
        .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_results_target_observed_at ON check_results(target, observed_at)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_check_results_hour_bucket ON check_results(hour_bucket)", ())
        .await?;

    Ok(())
}
