/// Database abstraction layer
///
/// Monitors, uptime/SSL status intervals and the latency log, stored in LibSQL.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{DatabaseImpl, IntervalStore, LatencyStore, MonitorStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
