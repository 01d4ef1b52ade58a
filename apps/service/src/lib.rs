//! Uptime and SSL certificate monitoring engine.

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod handlers;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;

#[cfg(test)]
mod testutils;
