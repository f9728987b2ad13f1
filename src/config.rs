use std::time::Duration;

use crate::error::{AppError, Result};

pub const DATASET_URL: &str = "http://localhost:5173/auction-data/complete-dataset.json";

/// Structural version of the local store layout. Bump whenever the tables or
/// indexes change; a mismatch against the stored metadata row forces a full
/// reset of the local database.
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

/// Schema version assumed for metadata rows written before the version was recorded.
pub const LEGACY_SCHEMA_VERSION: &str = "1.0.0";

/// Cache age below which startup skips the network probe and integrity checks.
pub const DEFAULT_FRESHNESS_SECS: u64 = 60 * 60;

/// Records inserted per batch during a refresh. Progress is reported per batch.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1000;

/// Size of the ranged request used to read the embedded version field.
pub const DEFAULT_PROBE_PREFIX_BYTES: u64 = 1024;

/// Connect timeout for snapshot requests. Total request time is unbounded.
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Share of the 0-100 progress scale spent on the download phase.
pub const DOWNLOAD_PROGRESS_SHARE: u8 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub dataset_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Startup fast-path window (FRESHNESS_SECS)
    pub freshness: Duration,
    /// Rows per insert batch (INSERT_BATCH_SIZE)
    pub insert_batch_size: usize,
    /// Bytes requested by the ranged version probe (PROBE_PREFIX_BYTES)
    pub probe_prefix_bytes: u64,
}

impl Config {
    pub fn new(dataset_url: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            dataset_url: dataset_url.into(),
            log_level: "info".to_string(),
            db_path: db_path.into(),
            api_port: 3000,
            freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            probe_prefix_bytes: DEFAULT_PROBE_PREFIX_BYTES,
        }
    }

    pub fn from_env() -> Result<Self> {
        let freshness_secs = env_parse("FRESHNESS_SECS", DEFAULT_FRESHNESS_SECS)?;
        let insert_batch_size = env_parse("INSERT_BATCH_SIZE", DEFAULT_INSERT_BATCH_SIZE)?;
        if insert_batch_size == 0 {
            return Err(AppError::Config("INSERT_BATCH_SIZE must be at least 1".to_string()));
        }

        Ok(Self {
            dataset_url: std::env::var("DATASET_URL").unwrap_or_else(|_| DATASET_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "auction-cache.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            freshness: Duration::from_secs(freshness_secs),
            insert_batch_size,
            probe_prefix_bytes: env_parse("PROBE_PREFIX_BYTES", DEFAULT_PROBE_PREFIX_BYTES)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
