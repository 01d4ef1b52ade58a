use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability status of a monitor, as stored in the uptime interval table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UptimeStatus {
    Up,
    Down,
}

impl std::fmt::Display for UptimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UptimeStatus::Up => write!(f, "UP"),
            UptimeStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Certificate health of a monitor, as stored in the SSL interval table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SslStatus {
    Valid,
    WillExpire,
    Invalid,
}

impl std::fmt::Display for SslStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslStatus::Valid => write!(f, "VALID"),
            SslStatus::WillExpire => write!(f, "WILL_EXPIRE"),
            SslStatus::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Which of a monitor's two periodic checks a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckCategory {
    Uptime,
    Ssl,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::Uptime => write!(f, "uptime"),
            CheckCategory::Ssl => write!(f, "ssl"),
        }
    }
}

/// HTTP method used by the uptime checker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            _ => None,
        }
    }
}

/// Validity window of a monitor's leaf certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}
