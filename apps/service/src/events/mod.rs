/// Check outcome events and the bus that fans them out
///
/// Every check run produces one or more [`MonitorEvent`]s. Consumers (the
/// event state store, the log handler, notification channels) subscribe to
/// the kinds they care about on the [`EventBus`].

pub mod bus;

pub use bus::{EventBus, Subscription};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use crate::database::models::{Monitor, SslInterval, UptimeInterval};
use crate::monitoring::types::{CertificateInfo, SslStatus, UptimeStatus};

/// The six independently subscribable event streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MonitorUp,
    MonitorDown,
    Redirect,
    SslValid,
    SslWillExpire,
    SslInvalid,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::MonitorUp => "monitor_up",
            EventKind::MonitorDown => "monitor_down",
            EventKind::Redirect => "redirect",
            EventKind::SslValid => "ssl_valid",
            EventKind::SslWillExpire => "ssl_will_expire",
            EventKind::SslInvalid => "ssl_invalid",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub enum UptimeOutcome {
    Up { status: u16, latency_ms: u64 },
    Down { status: Option<u16>, error: String },
}

/// Result of one uptime check
#[derive(Debug, Clone)]
pub struct UptimeEvent {
    pub monitor: Arc<Monitor>,
    pub dispatched_at: DateTime<Utc>,
    /// The monitor's open uptime interval when the event was built
    pub previous_event: Option<UptimeInterval>,
    pub outcome: UptimeOutcome,
}

impl UptimeEvent {
    pub fn new(monitor: Arc<Monitor>, previous_event: Option<UptimeInterval>, outcome: UptimeOutcome) -> Self {
        Self { monitor, dispatched_at: Utc::now(), previous_event, outcome }
    }

    pub fn status(&self) -> UptimeStatus {
        match self.outcome {
            UptimeOutcome::Up { .. } => UptimeStatus::Up,
            UptimeOutcome::Down { .. } => UptimeStatus::Down,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match &self.outcome {
            UptimeOutcome::Up { status, .. } => Some(*status),
            UptimeOutcome::Down { status, .. } => *status,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            UptimeOutcome::Up { .. } => None,
            UptimeOutcome::Down { error, .. } => Some(error),
        }
    }

    /// Whether the event has the same status as the open interval it refers to
    pub fn is_heartbeat(&self) -> bool {
        self.previous_event.as_ref().is_some_and(|previous| previous.status == self.status())
    }
}

/// A followed redirect hop. Informational only; never stored as a status.
#[derive(Debug, Clone)]
pub struct RedirectEvent {
    pub monitor: Arc<Monitor>,
    pub dispatched_at: DateTime<Utc>,
    pub location: Url,
}

impl RedirectEvent {
    pub fn new(monitor: Arc<Monitor>, location: Url) -> Self {
        Self { monitor, dispatched_at: Utc::now(), location }
    }
}

#[derive(Debug, Clone)]
pub enum SslOutcome {
    Valid { cert_info: CertificateInfo },
    WillExpire { cert_info: CertificateInfo },
    Invalid { error: String },
}

/// Result of one SSL check
#[derive(Debug, Clone)]
pub struct SslEvent {
    pub monitor: Arc<Monitor>,
    pub dispatched_at: DateTime<Utc>,
    pub previous_event: Option<SslInterval>,
    pub outcome: SslOutcome,
}

impl SslEvent {
    pub fn new(monitor: Arc<Monitor>, previous_event: Option<SslInterval>, outcome: SslOutcome) -> Self {
        Self { monitor, dispatched_at: Utc::now(), previous_event, outcome }
    }

    pub fn status(&self) -> SslStatus {
        match self.outcome {
            SslOutcome::Valid { .. } => SslStatus::Valid,
            SslOutcome::WillExpire { .. } => SslStatus::WillExpire,
            SslOutcome::Invalid { .. } => SslStatus::Invalid,
        }
    }

    pub fn cert_info(&self) -> Option<&CertificateInfo> {
        match &self.outcome {
            SslOutcome::Valid { cert_info } | SslOutcome::WillExpire { cert_info } => Some(cert_info),
            SslOutcome::Invalid { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SslOutcome::Invalid { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.previous_event.as_ref().is_some_and(|previous| previous.status == self.status())
    }
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Uptime(UptimeEvent),
    Redirect(RedirectEvent),
    Ssl(SslEvent),
}

impl MonitorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MonitorEvent::Uptime(event) => match event.outcome {
                UptimeOutcome::Up { .. } => EventKind::MonitorUp,
                UptimeOutcome::Down { .. } => EventKind::MonitorDown,
            },
            MonitorEvent::Redirect(_) => EventKind::Redirect,
            MonitorEvent::Ssl(event) => match event.outcome {
                SslOutcome::Valid { .. } => EventKind::SslValid,
                SslOutcome::WillExpire { .. } => EventKind::SslWillExpire,
                SslOutcome::Invalid { .. } => EventKind::SslInvalid,
            },
        }
    }

    pub fn monitor(&self) -> &Monitor {
        match self {
            MonitorEvent::Uptime(event) => &event.monitor,
            MonitorEvent::Redirect(event) => &event.monitor,
            MonitorEvent::Ssl(event) => &event.monitor,
        }
    }
}

impl From<UptimeEvent> for MonitorEvent {
    fn from(event: UptimeEvent) -> Self {
        MonitorEvent::Uptime(event)
    }
}

impl From<RedirectEvent> for MonitorEvent {
    fn from(event: RedirectEvent) -> Self {
        MonitorEvent::Redirect(event)
    }
}

impl From<SslEvent> for MonitorEvent {
    fn from(event: SslEvent) -> Self {
        MonitorEvent::Ssl(event)
    }
}
