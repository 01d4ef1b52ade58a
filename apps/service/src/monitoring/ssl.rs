use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use super::checker::CertificateFetcher;
use crate::database::models::Monitor;
use crate::error::SslCheckError;
use crate::events::{EventBus, SslEvent, SslOutcome};
use crate::handlers::StatusLookup;

/// Checks the certificate of monitors that are currently up
pub struct SslChecker {
    fetcher: Arc<dyn CertificateFetcher>,
    bus: EventBus,
    status_lookup: Arc<dyn StatusLookup>,
}

impl SslChecker {
    pub fn new(fetcher: Arc<dyn CertificateFetcher>, bus: EventBus, status_lookup: Arc<dyn StatusLookup>) -> Self {
        Self { fetcher, bus, status_lookup }
    }

    pub async fn check(&self, monitor: Arc<Monitor>) {
        let span = info_span!("ssl_check", monitor = monitor.id);
        self.run(monitor).instrument(span).await
    }

    async fn run(&self, monitor: Arc<Monitor>) {
        match self.status_lookup.is_monitor_up(monitor.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Monitor is not up, skipping SSL check");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not read uptime status, skipping SSL check");
                return;
            }
        }

        let previous = match self.status_lookup.open_ssl_interval(monitor.id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "Could not read the open SSL interval");
                None
            }
        };

        let outcome = match self.validate(&monitor.url).await {
            Ok(cert_info) => {
                let threshold = Utc::now() + Duration::days(i64::from(monitor.ssl_expiry_threshold_days));
                if cert_info.valid_to < threshold {
                    SslOutcome::WillExpire { cert_info }
                } else {
                    SslOutcome::Valid { cert_info }
                }
            }
            Err(e) => SslOutcome::Invalid { error: e.to_string() },
        };

        debug!(outcome = ?outcome, "SSL check finished");
        self.bus.publish(SslEvent::new(monitor, previous, outcome));
    }

    async fn validate(&self, url: &str) -> Result<crate::monitoring::types::CertificateInfo, SslCheckError> {
        let url = Url::parse(url).map_err(|e| SslCheckError(format!("Invalid URL '{url}': {e}")))?;
        self.fetcher.fetch(&url).await.map_err(|e| SslCheckError(format!("{e:#}")))
    }
}
