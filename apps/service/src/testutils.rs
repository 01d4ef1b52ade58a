//! Shared fixtures for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use url::Url;

use crate::database::models::{Monitor, SslInterval, StoredInterval, UptimeInterval};
use crate::database::{DatabaseImpl, MonitorStore, initialize_database};
use crate::error::PersistenceError;
use crate::events::{EventBus, MonitorEvent};
use crate::handlers::StatusLookup;
use crate::monitoring::checker::{CertificateFetcher, HttpClient, HttpRequest, HttpResponse};
use crate::monitoring::types::{CertificateInfo, UptimeStatus};
use crate::pool::open_pool;

/// Fresh migrated database in a temporary directory. Keep the directory
/// alive for as long as the database is used.
pub async fn create_test_database() -> Result<(DatabaseImpl, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");

    let pool = open_pool(&db_path.to_string_lossy(), 4).await?;
    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok((DatabaseImpl::new_from_pool(pool), temp_dir))
}

pub fn test_monitor() -> Monitor {
    let mut monitor = Monitor::new("test_monitor", "https://test.example.com/");
    monitor.id = 1;
    monitor
}

/// Persist a fresh copy of [`test_monitor`] and return it with its id
pub async fn save_test_monitor(database: &DatabaseImpl) -> Result<Monitor> {
    let mut monitor = Monitor::new("test_monitor", "https://test.example.com/");
    monitor.id = database.save_monitor(&monitor).await?;
    Ok(monitor)
}

type Scripted = Result<HttpResponse, String>;

/// HTTP client answering from a per-URL script. The last entry of a
/// script repeats forever.
#[derive(Default)]
pub struct ScriptedHttpClient {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn respond(&self, url: &str, status: u16, location: Option<&str>) {
        self.push(url, Ok(HttpResponse { status, location: location.map(str::to_owned) }));
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.push(url, Err(message.to_string()));
    }

    fn push(&self, url: &str, entry: Scripted) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(url.to_string()).or_default().push_back(entry);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(request.url.as_str())
            .ok_or_else(|| anyhow!("no script for {}", request.url))?;
        let entry = if script.len() > 1 { script.pop_front() } else { script.front().cloned() };

        match entry {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("empty script for {}", request.url)),
        }
    }
}

/// Certificate fetcher with a fixed answer
#[derive(Clone)]
pub struct ScriptedCertificateFetcher {
    answer: Result<CertificateInfo, String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedCertificateFetcher {
    pub fn valid(cert_info: CertificateInfo) -> Self {
        Self { answer: Ok(cert_info), calls: Arc::default() }
    }

    pub fn failing(message: &str) -> Self {
        Self { answer: Err(message.to_string()), calls: Arc::default() }
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateFetcher for ScriptedCertificateFetcher {
    async fn fetch(&self, _url: &Url) -> Result<CertificateInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().map_err(|message| anyhow!(message))
    }
}

/// Status lookup reporting a fixed open uptime interval and no SSL interval
#[derive(Default)]
pub struct StaticStatusLookup {
    uptime: Option<UptimeStatus>,
    uptime_lookups: AtomicUsize,
}

impl StaticStatusLookup {
    pub fn with_uptime(uptime: Option<UptimeStatus>) -> Self {
        Self { uptime, uptime_lookups: AtomicUsize::new(0) }
    }

    pub fn uptime_lookups(&self) -> usize {
        self.uptime_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusLookup for StaticStatusLookup {
    async fn open_uptime_interval(&self, monitor_id: i64) -> Result<Option<UptimeInterval>, PersistenceError> {
        self.uptime_lookups.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(self.uptime.map(|status| StoredInterval {
            id: 1,
            monitor_id,
            status,
            error: None,
            started_at: now,
            ended_at: None,
            updated_at: now,
        }))
    }

    async fn open_ssl_interval(&self, _monitor_id: i64) -> Result<Option<SslInterval>, PersistenceError> {
        Ok(None)
    }
}

/// In-memory monitor store
pub struct StaticMonitorStore {
    monitors: Mutex<Vec<Monitor>>,
}

impl StaticMonitorStore {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self { monitors: Mutex::new(monitors) }
    }
}

#[async_trait]
impl MonitorStore for StaticMonitorStore {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>, PersistenceError> {
        Ok(self.monitors.lock().unwrap().iter().filter(|m| m.enabled).cloned().collect())
    }

    async fn get_monitor_by_id(&self, id: i64) -> Result<Option<Monitor>, PersistenceError> {
        Ok(self.monitors.lock().unwrap().iter().find(|m| m.id == id).cloned())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64, PersistenceError> {
        let mut monitors = self.monitors.lock().unwrap();
        monitors.retain(|m| m.id != monitor.id);
        monitors.push(monitor.clone());
        Ok(monitor.id)
    }

    async fn delete_monitor(&self, id: i64) -> Result<(), PersistenceError> {
        self.monitors.lock().unwrap().retain(|m| m.id != id);
        Ok(())
    }
}

/// Forward every event published on the bus into one channel
pub fn collect_events(bus: &EventBus) -> mpsc::UnboundedReceiver<MonitorEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    macro_rules! forward {
        ($subscribe:ident) => {{
            let tx = tx.clone();
            bus.$subscribe(move |event| {
                let _ = tx.send(MonitorEvent::from(event));
                async { Ok(()) }
            });
        }};
    }

    forward!(subscribe_to_monitor_up_events);
    forward!(subscribe_to_monitor_down_events);
    forward!(subscribe_to_redirect_events);
    forward!(subscribe_to_ssl_valid_events);
    forward!(subscribe_to_ssl_will_expire_events);
    forward!(subscribe_to_ssl_invalid_events);

    rx
}

/// Wait for exactly `count` events, failing the test after a timeout
pub async fn next_events(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>, count: usize) -> Vec<MonitorEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        events.push(event);
    }
    events
}
