//! Shared tracing bootstrap for the upwatch binaries.

mod subscriber;

pub use subscriber::{init, init_tracing};
pub use tracing::level_filters::LevelFilter;
