use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::monitoring::uptime::{DEFAULT_USER_AGENT, RetryPolicy};

/// Retention periods shorter than this are rejected
pub const MIN_RETENTION_DAYS: u32 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub ssl: SslConfig,
    pub retention: RetentionConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub uptime_data_retention_days: u32,
    pub latency_data_retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Write every event to the log
    pub log_events: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "upwatch.db".into(), max_connections: 8 }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            timeout_seconds: 30,
            user_agent: DEFAULT_USER_AGENT.into(),
            max_attempts: retry.max_attempts,
            retry_backoff_ms: retry.backoff.as_millis() as u64,
        }
    }
}

impl Default for SslConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { uptime_data_retention_days: 30, latency_data_retention_days: 7 }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { log_events: true }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: std::time::Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("upwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "HTTP")?;
        write_1(f, "Timeout (s)", &self.http.timeout_seconds)?;
        write_1(f, "User Agent", &self.http.user_agent)?;
        write_1(f, "Max Attempts", &self.http.max_attempts)?;
        write_1(f, "Retry Backoff (ms)", &self.http.retry_backoff_ms)?;
        write_title_1(f, "SSL")?;
        write_1(f, "Timeout (s)", &self.ssl.timeout_seconds)?;
        write_title_1(f, "Retention")?;
        write_1(f, "Uptime Data (days)", &self.retention.uptime_data_retention_days)?;
        write_1(f, "Latency Data (days)", &self.retention.latency_data_retention_days)?;
        write_title_1(f, "Events")?;
        write_1(f, "Log Events", &self.events.log_events)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/upwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|err| ConfigError::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| ConfigError::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.database.path.trim().is_empty() {
            return invalid("database.path must not be empty".into());
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be at least 1".into());
        }
        if self.http.timeout_seconds == 0 {
            return invalid("http.timeout_seconds must be positive".into());
        }
        if self.http.max_attempts == 0 {
            return invalid("http.max_attempts must be at least 1".into());
        }
        if self.http.user_agent.trim().is_empty() {
            return invalid("http.user_agent must not be empty".into());
        }
        if self.ssl.timeout_seconds == 0 {
            return invalid("ssl.timeout_seconds must be positive".into());
        }
        if self.retention.uptime_data_retention_days < MIN_RETENTION_DAYS {
            return invalid(format!(
                "retention.uptime_data_retention_days must be at least {MIN_RETENTION_DAYS}"
            ));
        }
        if self.retention.latency_data_retention_days < MIN_RETENTION_DAYS {
            return invalid(format!(
                "retention.latency_data_retention_days must be at least {MIN_RETENTION_DAYS}"
            ));
        }

        Ok(())
    }
}
