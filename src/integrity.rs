use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::CURRENT_SCHEMA_VERSION;
use crate::db::LocalStore;
use crate::error::Result;
use crate::types::DatasetMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Schema matches and the cache is inside the freshness window.
    Fresh,
    /// Schema matches and the row count agrees with the metadata.
    Valid,
    SchemaMismatch,
    CountMismatch { expected: u64, actual: u64 },
}

impl Verdict {
    pub fn is_valid(self) -> bool {
        matches!(self, Verdict::Fresh | Verdict::Valid)
    }
}

/// Decides whether the local cache can be served without re-downloading.
///
/// The count comparison cannot detect rows that were altered in place or a
/// missing row offset by a duplicate. It is a cheap proxy, not a checksum.
#[derive(Debug, Clone)]
pub struct IntegrityValidator {
    schema_version: String,
    freshness: Duration,
}

impl IntegrityValidator {
    pub fn new(freshness: Duration) -> Self {
        Self { schema_version: CURRENT_SCHEMA_VERSION.to_string(), freshness }
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    pub fn schema_matches(&self, metadata: &DatasetMetadata) -> bool {
        metadata.schema_version == self.schema_version
    }

    /// Age of the cache, or `None` when `last_updated` is unreadable or in the future.
    pub fn age(metadata: &DatasetMetadata, now: DateTime<Utc>) -> Option<Duration> {
        let written = DateTime::parse_from_rfc3339(&metadata.last_updated).ok()?;
        (now - written.with_timezone(&Utc)).to_std().ok()
    }

    pub fn is_fresh(&self, metadata: &DatasetMetadata, now: DateTime<Utc>) -> bool {
        Self::age(metadata, now).is_some_and(|age| age < self.freshness)
    }

    /// Startup fast path: trusted without any I/O.
    pub fn fast_path(&self, metadata: &DatasetMetadata, now: DateTime<Utc>) -> bool {
        self.schema_matches(metadata) && self.is_fresh(metadata, now)
    }

    pub async fn assess(&self, metadata: &DatasetMetadata, store: &LocalStore) -> Result<Verdict> {
        if !self.schema_matches(metadata) {
            warn!(
                local = %metadata.schema_version,
                current = %self.schema_version,
                "Local store schema version differs; full reset required"
            );
            return Ok(Verdict::SchemaMismatch);
        }

        if self.is_fresh(metadata, Utc::now()) {
            debug!("Cache inside freshness window; skipping count check");
            return Ok(Verdict::Fresh);
        }

        let actual = store.count().await?;
        if actual != metadata.total_records {
            warn!(expected = metadata.total_records, actual, "Local record count mismatch");
            return Ok(Verdict::CountMismatch { expected: metadata.total_records, actual });
        }
        Ok(Verdict::Valid)
    }

    pub async fn validate(&self, metadata: &DatasetMetadata, store: &LocalStore) -> Result<bool> {
        Ok(self.assess(metadata, store).await?.is_valid())
    }
}
