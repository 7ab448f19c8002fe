//! Configuration management for logship
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use logship::config::ShipperConfig;
//!
//! let config = ShipperConfig::load().expect("Failed to load configuration");
//! println!("Shipping to {}/{}", config.stream.group_name, config.stream.stream_name);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `LOGSHIP__<section>__<key>`, e.g.
//! - `LOGSHIP__STREAM__GROUP_NAME=payments`
//! - `LOGSHIP__FLUSH__INTERVAL_MS=500`
//! - `LOGSHIP__TRANSPORT__ENDPOINT=http://localhost:4566`
//!
//! # Configuration File
//!
//! Read from `config/logship.toml` unless `LOGSHIP_CONFIG` names another path.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_RETENTION_DAYS, FlushConfig, MAX_REQUEST_BYTES,
    MAX_REQUEST_RECORDS, ShipperConfig, StreamIdentity, TransportConfig,
};
pub use validation::{RETENTION_DAYS_ALLOWED, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl ShipperConfig {
    /// Load configuration from all sources (file + environment) and validate it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file is malformed
    /// - A required value is missing or a limit is out of range
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
