//! # Washbay Common
//!
//! Shared plumbing for the Washbay offline cache and sync engine.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - JSON configuration loading with defaults
//! - Wall-clock helpers shared by the stores and the engine

pub mod config;
pub mod logging;

pub use config::{load_config, ConfigError};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
