use thiserror::Error;

/// Raised when a monitor's periodic checks cannot be set up.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("Uptime check interval must be positive, got {0} seconds")]
    InvalidInterval(u64),

    #[error("No async runtime is available to run the checks")]
    NoRuntime,

    #[error("SSL check could not be scheduled: {0}")]
    Ssl(Box<SchedulingError>),
}

/// Storage-layer failures, surfaced as-is to callers. The engine never retries them.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database query failed: {0}")]
    Database(#[from] libsql::Error),

    #[error("Could not get a database connection: {0}")]
    Pool(String),

    #[error("The given resource already exists: {0}")]
    Duplicated(String),

    #[error("Stored row is malformed: {0}")]
    Corrupted(String),
}

impl PersistenceError {
    /// Classifies a libsql error, turning unique constraint violations into
    /// [`PersistenceError::Duplicated`].
    pub fn from_libsql(error: libsql::Error) -> Self {
        let message = error.to_string();
        if message.contains("UNIQUE constraint failed") {
            Self::Duplicated(message)
        } else {
            Self::Database(error)
        }
    }
}

impl From<deadpool::managed::PoolError<libsql::Error>> for PersistenceError {
    fn from(error: deadpool::managed::PoolError<libsql::Error>) -> Self {
        Self::Pool(error.to_string())
    }
}

/// Why a single uptime check ended up DOWN. These never escape the checker;
/// they are rendered into the `Down` event's error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UptimeCheckError {
    #[error("Redirect loop detected")]
    RedirectLoop,

    #[error("Invalid redirection without a Location header")]
    InvalidRedirection,

    #[error("The request was redirected, but the followRedirects option is disabled")]
    RedirectsDisabled,

    #[error("Invalid HTTP status code: {0}")]
    InvalidStatus(u16),

    #[error("{0}")]
    UnexpectedStatus(&'static str),

    #[error("{0}")]
    Transport(String),
}

/// A certificate could not be obtained or did not verify.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SslCheckError(pub String);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read the config file: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("Failed to write the config file: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Failed to parse the config file: {0}")]
    ParseFailed(String),

    #[error("No config directory could be determined")]
    ConfigPathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
