/// Monitoring engine module - runs uptime and SSL checks on a schedule
///
/// This module is responsible for:
/// - Sending HTTP requests and following redirects (`uptime`)
/// - Reading certificates over TLS (`ssl`)
/// - Running both periodically without overlapping runs (`scheduler`, `lock`)
pub mod checker;
pub mod lock;
pub mod scheduler;
pub mod ssl;
pub mod types;
pub mod uptime;

pub use checker::{CertificateFetcher, HttpClient, ReqwestClient, TlsCertificateFetcher};
pub use lock::{LockGuard, LockRegistry};
pub use scheduler::{CheckScheduler, ScheduledCheck};
pub use ssl::SslChecker;
pub use uptime::{RetryPolicy, UptimeChecker};
