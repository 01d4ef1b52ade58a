use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{HttpMethod, SslStatus, UptimeStatus};

/// Monitor model - an endpoint checked for uptime and, optionally, certificate health.
///
/// Owned by the monitor management layer; the engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Seconds between two uptime checks
    pub uptime_check_interval: u64,
    pub enabled: bool,
    pub ssl_check_enabled: bool,
    pub ssl_expiry_threshold_days: u32,
    pub request_method: HttpMethod,
    pub follow_redirects: bool,
    pub force_no_cache: bool,
    pub latency_history_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new, not yet persisted monitor (`id == 0`) with the usual defaults
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            url: url.into(),
            uptime_check_interval: 60,
            enabled: true,
            ssl_check_enabled: false,
            ssl_expiry_threshold_days: 30,
            request_method: HttpMethod::Get,
            follow_redirects: true,
            force_no_cache: true,
            latency_history_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}

/// A status enum that can be stored as an interval row.
///
/// Each implementor owns one interval table; the same open/close discipline
/// applies to all of them.
pub trait IntervalStatus:
    Copy + Eq + Send + Sync + std::fmt::Debug + std::fmt::Display + 'static
{
    const TABLE: &'static str;

    fn as_str(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self>;
}

impl IntervalStatus for UptimeStatus {
    const TABLE: &'static str = "uptime_events";

    fn as_str(&self) -> &'static str {
        match self {
            UptimeStatus::Up => "UP",
            UptimeStatus::Down => "DOWN",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "UP" => Some(UptimeStatus::Up),
            "DOWN" => Some(UptimeStatus::Down),
            _ => None,
        }
    }
}

impl IntervalStatus for SslStatus {
    const TABLE: &'static str = "ssl_events";

    fn as_str(&self) -> &'static str {
        match self {
            SslStatus::Valid => "VALID",
            SslStatus::WillExpire => "WILL_EXPIRE",
            SslStatus::Invalid => "INVALID",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "VALID" => Some(SslStatus::Valid),
            "WILL_EXPIRE" => Some(SslStatus::WillExpire),
            "INVALID" => Some(SslStatus::Invalid),
            _ => None,
        }
    }
}

/// One stored status interval. `ended_at` is `None` while the interval is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInterval<S> {
    pub id: i64,
    pub monitor_id: i64,
    pub status: S,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl<S> StoredInterval<S> {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

pub type UptimeInterval = StoredInterval<UptimeStatus>;
pub type SslInterval = StoredInterval<SslStatus>;

/// Row to be inserted as the new open interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInterval<S> {
    pub monitor_id: i64,
    pub status: S,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// One latency measurement of a successful uptime check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySample {
    pub id: i64,
    pub monitor_id: i64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Convert a timestamp to epoch milliseconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
