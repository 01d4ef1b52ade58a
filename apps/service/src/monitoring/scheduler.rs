use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use super::lock::LockRegistry;
use super::ssl::SslChecker;
use super::types::CheckCategory;
use super::uptime::UptimeChecker;
use crate::database::MonitorStore;
use crate::database::models::Monitor;
use crate::error::{PersistenceError, SchedulingError};

pub const SSL_CHECK_INITIAL_DELAY: Duration = Duration::from_secs(60);
pub const SSL_CHECK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// A live periodic task of one monitor
#[derive(Debug, Clone)]
pub struct ScheduledCheck {
    pub monitor_id: i64,
    pub category: CheckCategory,
    task: AbortHandle,
}

impl ScheduledCheck {
    /// Stop future runs. A run that is already in flight completes.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

type CheckRegistry = Mutex<HashMap<i64, ScheduledCheck>>;

/// Owns the periodic uptime and SSL tasks of every monitor.
///
/// Each tick takes the monitor's lock without waiting; a tick that finds
/// the previous run still going is skipped.
pub struct CheckScheduler {
    monitors: Arc<dyn MonitorStore>,
    uptime_checker: Arc<UptimeChecker>,
    ssl_checker: Arc<SslChecker>,
    uptime_locks: Arc<LockRegistry>,
    ssl_locks: Arc<LockRegistry>,
    uptime_checks: CheckRegistry,
    ssl_checks: CheckRegistry,
}

/// First run of an uptime check, spread uniformly over `[1, interval]` seconds
fn initial_delay(interval: u64) -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(1..=interval.max(1)))
}

fn registry(checks: &CheckRegistry) -> MutexGuard<'_, HashMap<i64, ScheduledCheck>> {
    checks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CheckScheduler {
    pub fn new(monitors: Arc<dyn MonitorStore>, uptime_checker: Arc<UptimeChecker>, ssl_checker: Arc<SslChecker>) -> Self {
        Self {
            monitors,
            uptime_checker,
            ssl_checker,
            uptime_locks: Arc::new(LockRegistry::new()),
            ssl_locks: Arc::new(LockRegistry::new()),
            uptime_checks: Mutex::new(HashMap::new()),
            ssl_checks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule checks for every enabled monitor. Monitors that fail to
    /// schedule are logged and skipped.
    pub async fn initialize(&self) -> Result<(), PersistenceError> {
        let monitors = self.monitors.get_enabled_monitors().await?;
        info!("Scheduling checks for {} enabled monitors", monitors.len());

        for monitor in monitors {
            let _ = self.create_checks_for_monitor(monitor);
        }

        Ok(())
    }

    /// Schedule the uptime check and, if enabled, the SSL check of a monitor.
    /// Checks already scheduled for the same id are cancelled and replaced.
    ///
    /// When only the SSL check fails the uptime check stays scheduled.
    pub fn create_checks_for_monitor(&self, monitor: Monitor) -> Result<(), SchedulingError> {
        let monitor = Arc::new(monitor);

        let uptime = self.schedule_uptime_check(monitor.clone()).inspect_err(|e| {
            error!(monitor = monitor.id, error = %e, "Uptime check could not be scheduled");
        })?;
        if let Some(replaced) = registry(&self.uptime_checks).insert(monitor.id, uptime) {
            replaced.cancel();
        }
        info!(
            monitor = monitor.id,
            interval = monitor.uptime_check_interval,
            "Uptime check scheduled for \"{}\"",
            monitor.name
        );

        if monitor.ssl_check_enabled {
            let ssl = self.schedule_ssl_check(monitor.clone()).map_err(|e| {
                error!(monitor = monitor.id, error = %e, "SSL check could not be scheduled");
                SchedulingError::Ssl(Box::new(e))
            })?;
            if let Some(replaced) = registry(&self.ssl_checks).insert(monitor.id, ssl) {
                replaced.cancel();
            }
            info!(monitor = monitor.id, "SSL check scheduled for \"{}\"", monitor.name);
        } else if let Some(replaced) = registry(&self.ssl_checks).remove(&monitor.id) {
            replaced.cancel();
        }

        Ok(())
    }

    /// Replace a monitor's checks. The old ones are cancelled first.
    pub fn update_checks_for_monitor(&self, old: &Monitor, new: Monitor) -> Result<(), SchedulingError> {
        self.remove_checks_of_monitor(old);
        if new.enabled {
            self.create_checks_for_monitor(new)
        } else {
            Ok(())
        }
    }

    pub fn remove_checks_of_monitor(&self, monitor: &Monitor) {
        self.remove_checks_by_id(monitor.id);
    }

    pub fn remove_checks_by_id(&self, monitor_id: i64) {
        let removed = [&self.uptime_checks, &self.ssl_checks]
            .into_iter()
            .filter_map(|checks| registry(checks).remove(&monitor_id))
            .inspect(ScheduledCheck::cancel)
            .count();

        if removed > 0 {
            info!(monitor = monitor_id, removed, "Checks removed");
        }
    }

    pub fn remove_all_checks(&self) {
        let mut count = 0;
        for checks in [&self.uptime_checks, &self.ssl_checks] {
            for (_, check) in registry(checks).drain() {
                check.cancel();
                count += 1;
            }
        }
        info!("Removed {} scheduled checks", count);
    }

    pub fn scheduled_uptime_checks(&self) -> HashMap<i64, ScheduledCheck> {
        registry(&self.uptime_checks).clone()
    }

    pub fn scheduled_ssl_checks(&self) -> HashMap<i64, ScheduledCheck> {
        registry(&self.ssl_checks).clone()
    }

    pub fn uptime_locks(&self) -> &Arc<LockRegistry> {
        &self.uptime_locks
    }

    pub fn ssl_locks(&self) -> &Arc<LockRegistry> {
        &self.ssl_locks
    }

    fn schedule_uptime_check(&self, monitor: Arc<Monitor>) -> Result<ScheduledCheck, SchedulingError> {
        let interval = monitor.uptime_check_interval;
        if interval == 0 {
            return Err(SchedulingError::InvalidInterval(interval));
        }

        let initial_delay = initial_delay(interval);
        let checker = self.uptime_checker.clone();

        self.spawn_periodic(
            monitor,
            CheckCategory::Uptime,
            self.uptime_locks.clone(),
            initial_delay,
            Duration::from_secs(interval),
            move |monitor, guard| {
                let checker = checker.clone();
                async move {
                    // Released by the completion callback, or by unwinding
                    checker
                        .check_then(monitor, move |monitor| {
                            drop(guard);
                            debug!(monitor = monitor.id, "Uptime check completed");
                        })
                        .await;
                }
            },
        )
    }

    fn schedule_ssl_check(&self, monitor: Arc<Monitor>) -> Result<ScheduledCheck, SchedulingError> {
        let checker = self.ssl_checker.clone();

        self.spawn_periodic(
            monitor,
            CheckCategory::Ssl,
            self.ssl_locks.clone(),
            SSL_CHECK_INITIAL_DELAY,
            SSL_CHECK_PERIOD,
            move |monitor, guard| {
                let checker = checker.clone();
                async move {
                    let _guard = guard;
                    checker.check(monitor).await;
                }
            },
        )
    }

    /// Run `check` every `period` after `initial_delay`, each run on its own
    /// task so cancelling the timer leaves an in-flight run alone
    fn spawn_periodic<P, Fut>(
        &self,
        monitor: Arc<Monitor>,
        category: CheckCategory,
        locks: Arc<LockRegistry>,
        initial_delay: Duration,
        period: Duration,
        check: P,
    ) -> Result<ScheduledCheck, SchedulingError>
    where
        P: Fn(Arc<Monitor>, super::lock::LockGuard) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| SchedulingError::NoRuntime)?;
        let monitor_id = monitor.id;

        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(guard) = locks.try_lock(monitor.id) else {
                    debug!(monitor = monitor.id, %category, "Previous check still running, skipping this one");
                    continue;
                };

                tokio::spawn(check(monitor.clone(), guard));
            }
        });

        Ok(ScheduledCheck { monitor_id, category, task: task.abort_handle() })
    }
}
