//! Database row types for the metadata table. Auction rows decode straight
//! into [`AuctionRecord`](crate::types::AuctionRecord).

use crate::config::LEGACY_SCHEMA_VERSION;
use crate::error::Result;
use crate::types::DatasetMetadata;

#[derive(Debug, sqlx::FromRow)]
pub struct MetadataRow {
    pub id: i64,
    pub version: String,
    pub schema_version: Option<String>,
    pub total_records: i64,
    pub date_range_earliest: String,
    pub date_range_latest: String,
    /// JSON array
    pub regions: String,
    /// JSON array
    pub unions: String,
    pub last_updated: String,
}

impl MetadataRow {
    pub fn into_metadata(self) -> Result<DatasetMetadata> {
        Ok(DatasetMetadata {
            id: Some(self.id),
            version: self.version,
            schema_version: self
                .schema_version
                .unwrap_or_else(|| LEGACY_SCHEMA_VERSION.to_string()),
            total_records: u64::try_from(self.total_records).unwrap_or(0),
            date_range_earliest: self.date_range_earliest,
            date_range_latest: self.date_range_latest,
            regions: serde_json::from_str(&self.regions)?,
            unions: serde_json::from_str(&self.unions)?,
            last_updated: self.last_updated,
        })
    }
}
