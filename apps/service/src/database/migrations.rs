use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
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
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Uptime and SSL intervals, latency log").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            uptime_check_interval INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            ssl_check_enabled INTEGER NOT NULL DEFAULT 0,
            ssl_expiry_threshold_days INTEGER NOT NULL DEFAULT 30,
            request_method TEXT NOT NULL DEFAULT 'GET',
            follow_redirects INTEGER NOT NULL DEFAULT 1,
            force_no_cache INTEGER NOT NULL DEFAULT 1,
            latency_history_enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_enabled ON monitors(enabled)", ()).await?;

    Ok(())
}

/// Migration v2: status interval tables and the latency log
///
/// The partial unique indexes allow at most one open (`ended_at IS NULL`)
/// interval per monitor and table.
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    for table in ["uptime_events", "ssl_events"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    monitor_id INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    error TEXT,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER,
                    updated_at INTEGER NOT NULL,
                    FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
                )"
            ),
            (),
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_open ON {table}(monitor_id) WHERE ended_at IS NULL"
            ),
            (),
        )
        .await?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_monitor_started ON {table}(monitor_id, started_at)"
            ),
            (),
        )
        .await?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_ended_at ON {table}(ended_at)"),
            (),
        )
        .await?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS latency_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_latency_logs_monitor_created ON latency_logs(monitor_id, created_at DESC)",
        (),
    )
    .await?;

    Ok(())
}
