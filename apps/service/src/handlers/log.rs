use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::database::models::StoredInterval;
use crate::events::{EventBus, RedirectEvent, SslEvent, SslOutcome, Subscription, UptimeEvent, UptimeOutcome};

/// Writes every event to the log
pub struct LogEventHandler;

impl LogEventHandler {
    pub fn subscribe(bus: &EventBus) -> Vec<Subscription> {
        vec![
            bus.subscribe_to_monitor_up_events(|event| async move {
                info!(monitor = event.monitor.id, "{}", uptime_message(&event));
                Ok(())
            }),
            bus.subscribe_to_monitor_down_events(|event| async move {
                error!(monitor = event.monitor.id, "{}", uptime_message(&event));
                Ok(())
            }),
            bus.subscribe_to_redirect_events(|event| async move {
                warn!(monitor = event.monitor.id, location = %event.location, "{}", redirect_message(&event));
                Ok(())
            }),
            bus.subscribe_to_ssl_valid_events(|event| async move {
                info!(monitor = event.monitor.id, "{}", ssl_message(&event));
                Ok(())
            }),
            bus.subscribe_to_ssl_will_expire_events(|event| async move {
                warn!(monitor = event.monitor.id, "{}", ssl_message(&event));
                Ok(())
            }),
            bus.subscribe_to_ssl_invalid_events(|event| async move {
                error!(monitor = event.monitor.id, "{}", ssl_message(&event));
                Ok(())
            }),
        ]
    }
}

pub fn uptime_message(event: &UptimeEvent) -> String {
    let monitor = &event.monitor;
    let ended = ended_interval_duration(event.previous_event.as_ref(), event.is_heartbeat(), event.dispatched_at);

    match &event.outcome {
        UptimeOutcome::Up { status, latency_ms } => {
            let message = format!(
                "\"{}\" ({}) is UP ({}). Latency was: {}ms.",
                monitor.name, monitor.url, status, latency_ms
            );
            match ended {
                Some(duration) => format!("{message} Was down for {duration}."),
                None => message,
            }
        }
        UptimeOutcome::Down { error, .. } => {
            let message = format!("\"{}\" ({}) is DOWN. Reason: {}.", monitor.name, monitor.url, error);
            match ended {
                Some(duration) => format!("{message} Was up for {duration}."),
                None => message,
            }
        }
    }
}

pub fn redirect_message(event: &RedirectEvent) -> String {
    format!("Request to \"{}\" ({}) has been redirected", event.monitor.name, event.monitor.url)
}

pub fn ssl_message(event: &SslEvent) -> String {
    let monitor = &event.monitor;
    let previous = event.previous_event.as_ref();
    let ended = ended_interval_duration(previous, event.is_heartbeat(), event.dispatched_at)
        .zip(previous)
        .map(|(duration, previous)| format!("Was {} for {}", previous.status, duration));

    let mut parts = match &event.outcome {
        SslOutcome::Valid { .. } => {
            vec![format!("Your site \"{}\" ({}) has a VALID certificate", monitor.name, monitor.url)]
        }
        SslOutcome::WillExpire { cert_info } => {
            return format!(
                "Your SSL certificate for {} will expire soon. Expiry date: {}",
                monitor.url, cert_info.valid_to
            );
        }
        SslOutcome::Invalid { error } => vec![
            format!("Your site \"{}\" ({}) has an INVALID certificate", monitor.name, monitor.url),
            format!("Reason: {error}"),
        ],
    };
    parts.extend(ended);
    parts.join(". ")
}

/// How long the previous interval lasted, unless a heartbeat keeps it open
fn ended_interval_duration<S>(
    previous: Option<&StoredInterval<S>>,
    heartbeat: bool,
    dispatched_at: DateTime<Utc>,
) -> Option<String> {
    previous
        .filter(|_| !heartbeat)
        .map(|previous| format_duration((dispatched_at - previous.started_at).num_seconds()))
}

/// `D day(s), H hour(s), M minute(s), S second(s)`
pub fn format_duration(total_seconds: i64) -> String {
    let total = total_seconds.max(0);
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let seconds = total % 60;
    format!("{days} day(s), {hours} hour(s), {minutes} minute(s), {seconds} second(s)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::UptimeInterval;
    use crate::monitoring::types::{CertificateInfo, SslStatus, UptimeStatus};
    use crate::testutils::test_monitor;
    use chrono::Duration;
    use std::sync::Arc;

    fn interval<S>(status: S, started_at: DateTime<Utc>) -> StoredInterval<S> {
        StoredInterval { id: 1, monitor_id: 1, status, error: None, started_at, ended_at: None, updated_at: started_at }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0 day(s), 0 hour(s), 0 minute(s), 0 second(s)");
        assert_eq!(format_duration(90_061), "1 day(s), 1 hour(s), 1 minute(s), 1 second(s)");
    }

    #[test]
    fn test_up_message_after_downtime() {
        let now = Utc::now();
        let previous: UptimeInterval = interval(UptimeStatus::Down, now - Duration::seconds(125));
        let event = UptimeEvent {
            monitor: Arc::new(test_monitor()),
            dispatched_at: now,
            previous_event: Some(previous),
            outcome: UptimeOutcome::Up { status: 200, latency_ms: 120 },
        };

        assert_eq!(
            uptime_message(&event),
            "\"test_monitor\" (https://test.example.com/) is UP (200). Latency was: 120ms. \
             Was down for 0 day(s), 0 hour(s), 2 minute(s), 5 second(s)."
        );
    }

    #[test]
    fn test_down_message_without_previous() {
        let event = UptimeEvent::new(
            Arc::new(test_monitor()),
            None,
            UptimeOutcome::Down { status: Some(400), error: "Bad Request".into() },
        );

        assert_eq!(uptime_message(&event), "\"test_monitor\" (https://test.example.com/) is DOWN. Reason: Bad Request.");
    }

    #[test]
    fn test_ssl_messages() {
        let now = Utc::now();
        let monitor = Arc::new(test_monitor());

        let invalid = SslEvent {
            monitor: monitor.clone(),
            dispatched_at: now,
            previous_event: Some(interval(SslStatus::Valid, now - Duration::hours(2))),
            outcome: SslOutcome::Invalid { error: "ssl error".into() },
        };
        assert_eq!(
            ssl_message(&invalid),
            "Your site \"test_monitor\" (https://test.example.com/) has an INVALID certificate. \
             Reason: ssl error. Was VALID for 0 day(s), 2 hour(s), 0 minute(s), 0 second(s)"
        );

        let valid = SslEvent::new(
            monitor,
            Some(interval(SslStatus::Valid, now)),
            SslOutcome::Valid { cert_info: CertificateInfo { valid_from: now, valid_to: now } },
        );
        assert_eq!(ssl_message(&valid), "Your site \"test_monitor\" (https://test.example.com/) has a VALID certificate");
    }

    #[test]
    fn test_heartbeat_message_has_no_duration() {
        let now = Utc::now();
        let event = UptimeEvent {
            monitor: Arc::new(test_monitor()),
            dispatched_at: now,
            previous_event: Some(interval(UptimeStatus::Up, now - Duration::hours(3))),
            outcome: UptimeOutcome::Up { status: 200, latency_ms: 80 },
        };

        assert!(event.is_heartbeat());
        assert_eq!(
            uptime_message(&event),
            "\"test_monitor\" (https://test.example.com/) is UP (200). Latency was: 80ms."
        );
    }
}
