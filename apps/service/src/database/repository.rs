use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};

use super::models::{
    IntervalStatus, LatencySample, Monitor, NewInterval, StoredInterval, i64_to_timestamp,
    timestamp_to_i64,
};
use crate::error::PersistenceError;
use crate::monitoring::types::HttpMethod;
use crate::pool::{LibsqlManager, LibsqlPool};

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Read/write access to monitor definitions
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Get all enabled monitors
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>>;

    async fn get_monitor_by_id(&self, id: i64) -> Result<Option<Monitor>>;

    /// Insert a new monitor (`id == 0`) or update an existing one, returning its id
    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64>;

    /// Delete a monitor; its intervals and latency samples go with it
    async fn delete_monitor(&self, id: i64) -> Result<()>;
}

/// Status interval history of one category (uptime or SSL).
///
/// Only the event state store writes through this trait.
#[async_trait]
pub trait IntervalStore<S: IntervalStatus>: Send + Sync {
    /// Insert a new open interval and return its id
    async fn insert_open(&self, interval: &NewInterval<S>) -> Result<i64>;

    /// Close an interval: `ended_at = updated_at = ended_at`
    async fn end_by_id(&self, id: i64, ended_at: DateTime<Utc>) -> Result<()>;

    async fn update_updated_at(&self, id: i64, updated_at: DateTime<Utc>) -> Result<()>;

    /// Close `previous_id` and insert `interval` as the new open row in one transaction
    async fn end_and_insert(&self, previous_id: i64, interval: &NewInterval<S>) -> Result<i64>;

    /// All intervals of a monitor, oldest first
    async fn fetch_by_monitor(&self, monitor_id: i64) -> Result<Vec<StoredInterval<S>>>;

    /// The currently open interval of a monitor, if any
    async fn fetch_open(&self, monitor_id: i64) -> Result<Option<StoredInterval<S>>>;

    /// Delete closed intervals that ended before `limit`, returning the count
    async fn delete_before(&self, limit: DateTime<Utc>) -> Result<u64>;
}

/// Append-only latency history
#[async_trait]
pub trait LatencyStore: Send + Sync {
    async fn insert_latency(&self, monitor_id: i64, latency_ms: u64, created_at: DateTime<Utc>) -> Result<i64>;

    /// Latest samples of a monitor, newest first
    async fn fetch_latest_by_monitor(&self, monitor_id: i64, limit: Option<usize>) -> Result<Vec<LatencySample>>;

    async fn average_by_monitor(&self, monitor_id: i64) -> Result<Option<f64>>;

    async fn delete_latency_before(&self, limit: DateTime<Utc>) -> Result<u64>;
}

/// LibSQL implementation of every store
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

const MONITOR_COLUMNS: &str = "id, name, url, uptime_check_interval, enabled, ssl_check_enabled, \
     ssl_expiry_threshold_days, request_method, follow_redirects, force_no_cache, \
     latency_history_enabled, created_at, updated_at";

const INTERVAL_COLUMNS: &str = "id, monitor_id, status, error, started_at, ended_at, updated_at";

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn flag(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let method: String = row.get(7)?;
    let request_method = HttpMethod::parse(&method)
        .ok_or_else(|| PersistenceError::Corrupted(format!("unknown request method '{method}'")))?;

    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        uptime_check_interval: row.get::<i64>(3)?.max(0) as u64,
        enabled: row.get::<i64>(4)? != 0,
        ssl_check_enabled: row.get::<i64>(5)? != 0,
        ssl_expiry_threshold_days: row.get::<i64>(6)?.max(0) as u32,
        request_method,
        follow_redirects: row.get::<i64>(8)? != 0,
        force_no_cache: row.get::<i64>(9)? != 0,
        latency_history_enabled: row.get::<i64>(10)? != 0,
        created_at: i64_to_timestamp(row.get(11)?),
        updated_at: i64_to_timestamp(row.get(12)?),
    })
}

fn interval_from_row<S: IntervalStatus>(row: &Row) -> Result<StoredInterval<S>> {
    let status: String = row.get(2)?;
    let status = S::parse(&status).ok_or_else(|| {
        PersistenceError::Corrupted(format!("unknown status '{status}' in {}", S::TABLE))
    })?;

    Ok(StoredInterval {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        status,
        error: row.get(3)?,
        started_at: i64_to_timestamp(row.get(4)?),
        ended_at: row.get::<Option<i64>>(5)?.map(i64_to_timestamp),
        updated_at: i64_to_timestamp(row.get(6)?),
    })
}

async fn insert_interval<S: IntervalStatus>(conn: &Connection, interval: &NewInterval<S>) -> Result<i64> {
    let started_at = timestamp_to_i64(interval.started_at);
    conn.execute(
        &format!(
            "INSERT INTO {} (monitor_id, status, error, started_at, ended_at, updated_at) VALUES (?, ?, ?, ?, NULL, ?)",
            S::TABLE
        ),
        params![
            interval.monitor_id,
            interval.status.as_str(),
            interval.error.clone(),
            started_at,
            started_at
        ],
    )
    .await
    .map_err(PersistenceError::from_libsql)?;

    Ok(conn.last_insert_rowid())
}

async fn end_interval<S: IntervalStatus>(conn: &Connection, id: i64, ended_at: DateTime<Utc>) -> Result<()> {
    let ended_at = timestamp_to_i64(ended_at);
    conn.execute(
        &format!("UPDATE {} SET ended_at = ?, updated_at = ? WHERE id = ?", S::TABLE),
        params![ended_at, ended_at, id],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl MonitorStore for DatabaseImpl {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE enabled = 1 ORDER BY id"),
                (),
            )
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn get_monitor_by_id(&self, id: i64) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        let conn = self.get_conn().await?;
        let created_at = timestamp_to_i64(monitor.created_at);
        let updated_at = timestamp_to_i64(monitor.updated_at);

        if monitor.is_persisted() {
            conn.execute(
                "UPDATE monitors SET name = ?, url = ?, uptime_check_interval = ?, enabled = ?, ssl_check_enabled = ?, ssl_expiry_threshold_days = ?, request_method = ?, follow_redirects = ?, force_no_cache = ?, latency_history_enabled = ?, updated_at = ? WHERE id = ?",
                params![
                    monitor.name.clone(),
                    monitor.url.clone(),
                    monitor.uptime_check_interval as i64,
                    flag(monitor.enabled),
                    flag(monitor.ssl_check_enabled),
                    monitor.ssl_expiry_threshold_days as i64,
                    monitor.request_method.as_str(),
                    flag(monitor.follow_redirects),
                    flag(monitor.force_no_cache),
                    flag(monitor.latency_history_enabled),
                    updated_at,
                    monitor.id
                ],
            )
            .await
            .map_err(PersistenceError::from_libsql)?;
            Ok(monitor.id)
        } else {
            conn.execute(
                "INSERT INTO monitors (name, url, uptime_check_interval, enabled, ssl_check_enabled, ssl_expiry_threshold_days, request_method, follow_redirects, force_no_cache, latency_history_enabled, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    monitor.name.clone(),
                    monitor.url.clone(),
                    monitor.uptime_check_interval as i64,
                    flag(monitor.enabled),
                    flag(monitor.ssl_check_enabled),
                    monitor.ssl_expiry_threshold_days as i64,
                    monitor.request_method.as_str(),
                    flag(monitor.follow_redirects),
                    flag(monitor.force_no_cache),
                    flag(monitor.latency_history_enabled),
                    created_at,
                    updated_at
                ],
            )
            .await
            .map_err(PersistenceError::from_libsql)?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn delete_monitor(&self, id: i64) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM monitors WHERE id = ?", params![id]).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: IntervalStatus> IntervalStore<S> for DatabaseImpl {
    async fn insert_open(&self, interval: &NewInterval<S>) -> Result<i64> {
        let conn = self.get_conn().await?;
        insert_interval(&conn, interval).await
    }

    async fn end_by_id(&self, id: i64, ended_at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        end_interval::<S>(&conn, id, ended_at).await
    }

    async fn update_updated_at(&self, id: i64, updated_at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!("UPDATE {} SET updated_at = ? WHERE id = ?", S::TABLE),
            params![timestamp_to_i64(updated_at), id],
        )
        .await?;
        Ok(())
    }

    async fn end_and_insert(&self, previous_id: i64, interval: &NewInterval<S>) -> Result<i64> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        // Dropping the transaction without commit rolls both statements back
        end_interval::<S>(&tx, previous_id, interval.started_at).await?;
        let id = insert_interval(&tx, interval).await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn fetch_by_monitor(&self, monitor_id: i64) -> Result<Vec<StoredInterval<S>>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INTERVAL_COLUMNS} FROM {} WHERE monitor_id = ? ORDER BY started_at, id",
                    S::TABLE
                ),
                params![monitor_id],
            )
            .await?;

        let mut intervals = Vec::new();
        while let Some(row) = rows.next().await? {
            intervals.push(interval_from_row(&row)?);
        }

        Ok(intervals)
    }

    async fn fetch_open(&self, monitor_id: i64) -> Result<Option<StoredInterval<S>>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INTERVAL_COLUMNS} FROM {} WHERE monitor_id = ? AND ended_at IS NULL",
                    S::TABLE
                ),
                params![monitor_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(interval_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_before(&self, limit: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE ended_at IS NOT NULL AND ended_at < ?", S::TABLE),
                params![timestamp_to_i64(limit)],
            )
            .await?;
        Ok(deleted)
    }
}

#[async_trait]
impl LatencyStore for DatabaseImpl {
    async fn insert_latency(&self, monitor_id: i64, latency_ms: u64, created_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO latency_logs (monitor_id, latency_ms, created_at) VALUES (?, ?, ?)",
            params![monitor_id, latency_ms as i64, timestamp_to_i64(created_at)],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn fetch_latest_by_monitor(&self, monitor_id: i64, limit: Option<usize>) -> Result<Vec<LatencySample>> {
        let conn = self.get_conn().await?;
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, latency_ms, created_at FROM latency_logs WHERE monitor_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                params![monitor_id, limit],
            )
            .await?;

        let mut samples = Vec::new();
        while let Some(row) = rows.next().await? {
            samples.push(LatencySample {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                latency_ms: row.get::<i64>(2)?.max(0) as u64,
                created_at: i64_to_timestamp(row.get(3)?),
            });
        }

        Ok(samples)
    }

    async fn average_by_monitor(&self, monitor_id: i64) -> Result<Option<f64>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT AVG(latency_ms) FROM latency_logs WHERE monitor_id = ?", params![monitor_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<f64>>(0)?),
            None => Ok(None),
        }
    }

    async fn delete_latency_before(&self, limit: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM latency_logs WHERE created_at < ?",
                params![timestamp_to_i64(limit)],
            )
            .await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{SslStatus, UptimeStatus};
    use crate::testutils::{create_test_database, save_test_monitor};
    use chrono::Duration;

    #[tokio::test]
    async fn test_save_and_fetch_monitor() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;

        let mut monitor = Monitor::new("example", "https://example.com");
        monitor.ssl_check_enabled = true;
        monitor.request_method = HttpMethod::Head;
        let id = database.save_monitor(&monitor).await?;

        let stored = database.get_monitor_by_id(id).await?.expect("monitor should exist");
        assert_eq!(stored.name, "example");
        assert_eq!(stored.request_method, HttpMethod::Head);
        assert!(stored.ssl_check_enabled);

        let mut disabled = Monitor::new("disabled", "https://disabled.example.com");
        disabled.enabled = false;
        database.save_monitor(&disabled).await?;

        let enabled = database.get_enabled_monitors().await?;
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, id);

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_monitor_name_is_reported() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;

        database.save_monitor(&Monitor::new("same", "https://a.example.com")).await?;
        let result = database.save_monitor(&Monitor::new("same", "https://b.example.com")).await;

        assert!(matches!(result, Err(PersistenceError::Duplicated(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_end_and_insert_closes_previous_interval() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;
        let monitor = save_test_monitor(&database).await?;
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        let first = NewInterval { monitor_id: monitor.id, status: UptimeStatus::Down, error: None, started_at: t0 };
        let first_id = IntervalStore::<UptimeStatus>::insert_open(&database, &first).await?;

        let second = NewInterval { monitor_id: monitor.id, status: UptimeStatus::Up, error: None, started_at: t1 };
        IntervalStore::<UptimeStatus>::end_and_insert(&database, first_id, &second).await?;

        let intervals = IntervalStore::<UptimeStatus>::fetch_by_monitor(&database, monitor.id).await?;
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].ended_at.map(timestamp_to_i64), Some(timestamp_to_i64(t1)));
        assert!(intervals[1].is_open());

        let open = IntervalStore::<UptimeStatus>::fetch_open(&database, monitor.id).await?;
        assert_eq!(open.map(|i| i.status), Some(UptimeStatus::Up));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_open_interval_is_rejected() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;
        let monitor = save_test_monitor(&database).await?;
        let interval = NewInterval {
            monitor_id: monitor.id,
            status: SslStatus::Valid,
            error: None,
            started_at: Utc::now(),
        };

        IntervalStore::<SslStatus>::insert_open(&database, &interval).await?;
        let result = IntervalStore::<SslStatus>::insert_open(&database, &interval).await;

        assert!(result.is_err());
        assert_eq!(IntervalStore::<SslStatus>::fetch_by_monitor(&database, monitor.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_transaction_keeps_previous_interval_open() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;
        let monitor = save_test_monitor(&database).await?;
        let now = Utc::now();

        let open = NewInterval { monitor_id: monitor.id, status: UptimeStatus::Up, error: None, started_at: now };
        let open_id = IntervalStore::<UptimeStatus>::insert_open(&database, &open).await?;

        // The insert half violates the foreign key, so the close half must roll back too
        let orphan = NewInterval { monitor_id: 9_999, status: UptimeStatus::Down, error: None, started_at: now };
        let result = IntervalStore::<UptimeStatus>::end_and_insert(&database, open_id, &orphan).await;
        assert!(result.is_err());

        let still_open = IntervalStore::<UptimeStatus>::fetch_open(&database, monitor.id).await?;
        assert_eq!(still_open.map(|i| i.id), Some(open_id));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_before_keeps_open_intervals() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;
        let monitor = save_test_monitor(&database).await?;
        let long_ago = Utc::now() - Duration::days(60);

        let old = NewInterval { monitor_id: monitor.id, status: UptimeStatus::Down, error: None, started_at: long_ago };
        let old_id = IntervalStore::<UptimeStatus>::insert_open(&database, &old).await?;
        let current = NewInterval {
            monitor_id: monitor.id,
            status: UptimeStatus::Up,
            error: None,
            started_at: long_ago + Duration::days(1),
        };
        IntervalStore::<UptimeStatus>::end_and_insert(&database, old_id, &current).await?;

        let deleted = IntervalStore::<UptimeStatus>::delete_before(&database, Utc::now() - Duration::days(30)).await?;
        assert_eq!(deleted, 1);

        let remaining = IntervalStore::<UptimeStatus>::fetch_by_monitor(&database, monitor.id).await?;
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_open());
        Ok(())
    }

    #[tokio::test]
    async fn test_latency_log() -> anyhow::Result<()> {
        let (database, _dir) = create_test_database().await?;
        let monitor = save_test_monitor(&database).await?;
        let now = Utc::now();

        database.insert_latency(monitor.id, 100, now - Duration::days(10)).await?;
        database.insert_latency(monitor.id, 300, now).await?;

        let latest = database.fetch_latest_by_monitor(monitor.id, Some(1)).await?;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].latency_ms, 300);
        assert_eq!(database.average_by_monitor(monitor.id).await?, Some(200.0));

        let deleted = database.delete_latency_before(now - Duration::days(7)).await?;
        assert_eq!(deleted, 1);
        assert_eq!(database.fetch_latest_by_monitor(monitor.id, None).await?.len(), 1);
        Ok(())
    }
}
