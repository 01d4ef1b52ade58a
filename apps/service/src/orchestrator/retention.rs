//! Automatic retention and cleanup of monitoring history.
//!
//! This module manages data lifecycle:
//! - Closed uptime and SSL intervals: cleaned up after the uptime retention period
//! - Latency samples: cleaned up after the latency retention period
//!
//! Open intervals are never deleted. Cleanup runs daily as a background task.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::{IntervalStore, LatencyStore};
use crate::monitoring::types::{SslStatus, UptimeStatus};

const CLEANUP_PERIOD: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// Retention policy for the stored history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Days to keep closed uptime and SSL intervals
    pub uptime_data_days: u32,
    /// Days to keep latency samples
    pub latency_data_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            uptime_data_days: config.uptime_data_retention_days,
            latency_data_days: config.latency_data_retention_days,
        }
    }
}

/// Rows deleted by one cleanup run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub uptime_intervals: u64,
    pub ssl_intervals: u64,
    pub latency_samples: u64,
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    uptime: Arc<dyn IntervalStore<UptimeStatus>>,
    ssl: Arc<dyn IntervalStore<SslStatus>>,
    latency: Arc<dyn LatencyStore>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(
        uptime: Arc<dyn IntervalStore<UptimeStatus>>,
        ssl: Arc<dyn IntervalStore<SslStatus>>,
        latency: Arc<dyn LatencyStore>,
        policy: RetentionPolicy,
    ) -> Self {
        Self { uptime, ssl, latency, policy }
    }

    /// Delete everything older than the policy allows
    pub async fn cleanup_expired(&self) -> Result<CleanupReport> {
        let now = Utc::now();
        let uptime_cutoff = now - Duration::days(i64::from(self.policy.uptime_data_days));
        let latency_cutoff = now - Duration::days(i64::from(self.policy.latency_data_days));

        debug!(%uptime_cutoff, %latency_cutoff, "Starting retention cleanup");

        let report = CleanupReport {
            uptime_intervals: self.uptime.delete_before(uptime_cutoff).await?,
            ssl_intervals: self.ssl.delete_before(uptime_cutoff).await?,
            latency_samples: self.latency.delete_latency_before(latency_cutoff).await?,
        };

        info!(
            "Retention cleanup completed: {} uptime intervals, {} SSL intervals, {} latency samples deleted",
            report.uptime_intervals, report.ssl_intervals, report.latency_samples
        );

        Ok(report)
    }

    /// Start background cleanup task (runs daily, first run immediately)
    pub fn start_periodic_cleanup(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_PERIOD);

            loop {
                interval.tick().await;

                if let Err(e) = self.cleanup_expired().await {
                    warn!("Periodic retention cleanup failed: {}", e);
                }
            }
        })
    }
}
