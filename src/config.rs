//! Environment-driven configuration for migration runs
//!
//! All knobs come from the environment (or a .env file loaded by the
//! binary) so that staging and production runs differ only in env vars.

use crate::error::{MigrateError, Result};

/// Configuration for one migration process
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Connection string for the legacy relational source
    pub source_database_url: String,

    /// Connection string for the target content-resource store
    pub target_database_url: String,

    /// Base URL of the event-log transport (e.g. http://127.0.0.1:8090)
    pub event_log_url: String,

    /// Directory holding the durable mapping store (SQLite)
    pub mapping_store_path: String,

    /// Run identifier; generated when not provided
    pub run_id: String,

    /// Stream time-to-live in seconds
    pub stream_ttl_secs: u64,
}

impl MigratorConfig {
    /// Default stream TTL: 24 hours
    pub const DEFAULT_STREAM_TTL_SECS: u64 = 86_400;

    /// Load configuration from the environment.
    ///
    /// `SOURCE_DATABASE_URL` and `TARGET_DATABASE_URL` are required for
    /// migration runs; the rest have defaults.
    pub fn from_env() -> Result<Self> {
        let source_database_url = std::env::var("SOURCE_DATABASE_URL")
            .map_err(|_| MigrateError::Config("SOURCE_DATABASE_URL must be set".to_string()))?;
        let target_database_url = std::env::var("TARGET_DATABASE_URL")
            .map_err(|_| MigrateError::Config("TARGET_DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            source_database_url,
            target_database_url,
            event_log_url: std::env::var("EVENT_LOG_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            mapping_store_path: std::env::var("MAPPING_STORE_PATH")
                .unwrap_or_else(|_| "./migration_state".to_string()),
            run_id: std::env::var("MIGRATION_RUN_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            stream_ttl_secs: std::env::var("STREAM_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_STREAM_TTL_SECS),
        })
    }
}
