use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use crate::database::models::{IntervalStatus, NewInterval, SslInterval, StoredInterval, UptimeInterval};
use crate::database::{DatabaseImpl, IntervalStore, LatencyStore};
use crate::error::PersistenceError;
use crate::events::{EventBus, SslEvent, Subscription, UptimeEvent, UptimeOutcome};
use crate::monitoring::types::{SslStatus, UptimeStatus};

/// Longest error text stored on an interval row
pub const MAX_ERROR_LENGTH: usize = 255;
const REDACTED_SUFFIX: &str = "... [REDACTED]";

/// Read access to the currently open intervals, used by the checkers to
/// attach `previous_event` and by the SSL checker to skip unreachable hosts
#[async_trait]
pub trait StatusLookup: Send + Sync {
    async fn open_uptime_interval(&self, monitor_id: i64) -> Result<Option<UptimeInterval>, PersistenceError>;

    async fn open_ssl_interval(&self, monitor_id: i64) -> Result<Option<SslInterval>, PersistenceError>;

    async fn is_monitor_up(&self, monitor_id: i64) -> Result<bool, PersistenceError> {
        Ok(self
            .open_uptime_interval(monitor_id)
            .await?
            .is_some_and(|interval| interval.status == UptimeStatus::Up))
    }
}

/// Turns the event stream into non-overlapping status intervals.
///
/// This is the only writer of interval rows. Writes are serialized, so the
/// "one open row per monitor" rule holds even when events of different
/// monitors arrive at the same time.
pub struct EventStateStore {
    uptime: Arc<dyn IntervalStore<UptimeStatus>>,
    ssl: Arc<dyn IntervalStore<SslStatus>>,
    latency: Arc<dyn LatencyStore>,
    write_lock: Mutex<()>,
}

impl EventStateStore {
    pub fn new(database: Arc<DatabaseImpl>) -> Self {
        Self::with_stores(database.clone(), database.clone(), database)
    }

    pub fn with_stores(
        uptime: Arc<dyn IntervalStore<UptimeStatus>>,
        ssl: Arc<dyn IntervalStore<SslStatus>>,
        latency: Arc<dyn LatencyStore>,
    ) -> Self {
        Self { uptime, ssl, latency, write_lock: Mutex::new(()) }
    }

    /// Subscribe to every status event kind on the bus
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        vec![
            bus.subscribe_to_monitor_up_events(uptime_handler(self.clone())),
            bus.subscribe_to_monitor_down_events(uptime_handler(self.clone())),
            bus.subscribe_to_ssl_valid_events(ssl_handler(self.clone())),
            bus.subscribe_to_ssl_will_expire_events(ssl_handler(self.clone())),
            bus.subscribe_to_ssl_invalid_events(ssl_handler(self.clone())),
        ]
    }

    pub async fn handle_uptime_event(&self, event: &UptimeEvent) -> Result<(), PersistenceError> {
        let monitor = &event.monitor;
        let _guard = self.write_lock.lock().await;

        if let UptimeOutcome::Up { latency_ms, .. } = event.outcome {
            if monitor.latency_history_enabled {
                self.latency.insert_latency(monitor.id, latency_ms, event.dispatched_at).await?;
            }
        }

        apply_transition(
            self.uptime.as_ref(),
            monitor.id,
            event.status(),
            event.error().map(redact_error),
            event.previous_event.as_ref(),
            event.dispatched_at,
        )
        .await
    }

    pub async fn handle_ssl_event(&self, event: &SslEvent) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        apply_transition(
            self.ssl.as_ref(),
            event.monitor.id,
            event.status(),
            event.error().map(redact_error),
            event.previous_event.as_ref(),
            event.dispatched_at,
        )
        .await
    }
}

#[async_trait]
impl StatusLookup for EventStateStore {
    async fn open_uptime_interval(&self, monitor_id: i64) -> Result<Option<UptimeInterval>, PersistenceError> {
        self.uptime.fetch_open(monitor_id).await
    }

    async fn open_ssl_interval(&self, monitor_id: i64) -> Result<Option<SslInterval>, PersistenceError> {
        self.ssl.fetch_open(monitor_id).await
    }
}

fn uptime_handler(
    store: Arc<EventStateStore>,
) -> impl Fn(UptimeEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
    move |event: UptimeEvent| -> BoxFuture<'static, anyhow::Result<()>> {
        let store = store.clone();
        Box::pin(async move { Ok(store.handle_uptime_event(&event).await?) })
    }
}

fn ssl_handler(
    store: Arc<EventStateStore>,
) -> impl Fn(SslEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
    move |event: SslEvent| -> BoxFuture<'static, anyhow::Result<()>> {
        let store = store.clone();
        Box::pin(async move { Ok(store.handle_ssl_event(&event).await?) })
    }
}

/// Open, heartbeat or close-and-open, depending on the previous open interval
async fn apply_transition<S: IntervalStatus>(
    store: &dyn IntervalStore<S>,
    monitor_id: i64,
    status: S,
    error: Option<String>,
    previous: Option<&StoredInterval<S>>,
    dispatched_at: DateTime<Utc>,
) -> Result<(), PersistenceError> {
    let next = NewInterval { monitor_id, status, error, started_at: dispatched_at };

    match previous {
        None => {
            let id = store.insert_open(&next).await?;
            debug!(monitor = monitor_id, table = S::TABLE, %status, id, "Opened first interval");
        }
        Some(previous) if previous.status == status => {
            store.update_updated_at(previous.id, dispatched_at).await?;
        }
        Some(previous) => {
            let id = store.end_and_insert(previous.id, &next).await?;
            debug!(
                monitor = monitor_id,
                table = S::TABLE,
                from = %previous.status,
                to = %status,
                id,
                "Status changed"
            );
        }
    }

    Ok(())
}

/// Prefix an error with `Reason: ` and cap it at [`MAX_ERROR_LENGTH`] characters
pub fn redact_error(error: &str) -> String {
    let reason = format!("Reason: {error}");
    if reason.chars().count() <= MAX_ERROR_LENGTH {
        return reason;
    }

    let keep = MAX_ERROR_LENGTH - REDACTED_SUFFIX.chars().count();
    let mut redacted: String = reason.chars().take(keep).collect();
    redacted.push_str(REDACTED_SUFFIX);
    redacted
}
