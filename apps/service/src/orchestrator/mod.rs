/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Builds the event bus and its subscribers
/// - Builds the checkers and the check scheduler on top of the database
/// - Runs until shutdown, then cancels every scheduled check
///
/// ## Retention
/// The `retention` submodule deletes history older than the configured
/// retention periods once a day.

pub mod retention;

pub use retention::{CleanupReport, RetentionCleanup, RetentionPolicy};

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{DatabaseImpl, initialize_database};
use crate::events::{EventBus, Subscription};
use crate::handlers::{EventStateStore, LogEventHandler};
use crate::monitoring::{CheckScheduler, ReqwestClient, SslChecker, TlsCertificateFetcher, UptimeChecker};
use crate::pool::LibsqlPool;

/// Main orchestrator for the upwatch service
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<DatabaseImpl>,
    bus: EventBus,
    state_store: Arc<EventStateStore>,
    scheduler: Arc<CheckScheduler>,
    subscriptions: Vec<Subscription>,
    retention_cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let orchestrator = Self::new(config, pool).await?;
        orchestrator.run().await
    }

    /// Create a new orchestrator instance. Nothing is scheduled yet.
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let config = Arc::new(config);

        // Get database connection for initialization
        let conn = pool.get().await?;

        // Initialize database schema
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        // Create database instance with pool
        let database = Arc::new(DatabaseImpl::new_from_pool(pool));

        let bus = EventBus::new();

        // The state store subscribes before any check can publish
        let state_store = Arc::new(EventStateStore::new(database.clone()));
        let mut subscriptions = state_store.subscribe(&bus);
        if config.events.log_events {
            subscriptions.extend(LogEventHandler::subscribe(&bus));
        }

        let uptime_checker = Arc::new(UptimeChecker::new(
            Arc::new(ReqwestClient::new(config.http.timeout_seconds)?),
            bus.clone(),
            state_store.clone(),
            config.http.retry_policy(),
            config.http.user_agent.clone(),
        ));
        let ssl_checker = Arc::new(SslChecker::new(
            Arc::new(TlsCertificateFetcher::new(config.ssl.timeout_seconds)?),
            bus.clone(),
            state_store.clone(),
        ));

        let scheduler = Arc::new(CheckScheduler::new(database.clone(), uptime_checker, ssl_checker));

        Ok(Self {
            config,
            database,
            bus,
            state_store,
            scheduler,
            subscriptions,
            retention_cleanup_handle: None,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<CheckScheduler> {
        &self.scheduler
    }

    pub fn state_store(&self) -> &Arc<EventStateStore> {
        &self.state_store
    }

    pub fn database(&self) -> &Arc<DatabaseImpl> {
        &self.database
    }

    /// Schedule all enabled monitors and start the retention task
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Loading monitors from database...");
        self.scheduler.initialize().await?;
        info!(
            "{} uptime checks and {} SSL checks scheduled",
            self.scheduler.scheduled_uptime_checks().len(),
            self.scheduler.scheduled_ssl_checks().len()
        );

        let policy = RetentionPolicy::from(&self.config.retention);
        info!(
            "Retention policy: uptime={}d, latency={}d",
            policy.uptime_data_days, policy.latency_data_days
        );
        let database = self.database.clone();
        let cleanup = RetentionCleanup::new(database.clone(), database.clone(), database, policy);
        self.retention_cleanup_handle = Some(cleanup.start_periodic_cleanup());

        Ok(())
    }

    /// Cancel every scheduled check and background task
    pub fn shutdown(&mut self) {
        self.scheduler.remove_all_checks();

        if let Some(handle) = self.retention_cleanup_handle.take() {
            handle.abort();
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
    }

    /// Run the orchestrator until Ctrl-C
    async fn run(mut self) -> Result<()> {
        info!("Starting upwatch orchestrator...");
        self.initialize().await?;
        info!("Orchestrator started successfully - checks are running");

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for the shutdown signal: {}", e);
        }

        info!("Shutting down...");
        self.shutdown();
        Ok(())
    }
}
