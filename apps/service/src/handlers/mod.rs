/// Event bus subscribers
///
/// `database` keeps the interval history, `log` reports events to the log.

pub mod database;
pub mod log;

pub use database::{EventStateStore, StatusLookup, redact_error};
pub use log::LogEventHandler;
