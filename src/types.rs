use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AuctionRecord
// ---------------------------------------------------------------------------

/// One region/union/date observation, already normalized by the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    /// Assigned by the local store on insert; never present on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// `YYYY-MM-DD`
    pub date: String,
    pub region: String,
    #[serde(rename = "union")]
    pub union_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// kg
    pub auction_quantity_until_yesterday: f64,
    pub auction_quantity_today: f64,
    pub auction_quantity_total: f64,

    /// won
    pub auction_amount_until_yesterday: f64,
    pub auction_amount_today: f64,
    pub auction_amount_total: f64,

    pub grade1_quantity: f64,
    pub grade1_unit_price: f64,
    pub grade2_quantity: f64,
    pub grade2_unit_price: f64,
    pub grade3_stopped_quantity: f64,
    pub grade3_stopped_unit_price: f64,
    pub grade3_estimated_quantity: f64,
    pub grade3_estimated_unit_price: f64,
    pub grade_below_quantity: f64,
    pub grade_below_unit_price: f64,
    pub mixed_grade_quantity: f64,
    pub mixed_grade_unit_price: f64,
}

impl AuctionRecord {
    /// Returns `(quantity, unit_price)` for a grade.
    pub fn grade(&self, grade: Grade) -> (f64, f64) {
        match grade {
            Grade::Grade1 => (self.grade1_quantity, self.grade1_unit_price),
            Grade::Grade2 => (self.grade2_quantity, self.grade2_unit_price),
            Grade::Grade3Stopped => (self.grade3_stopped_quantity, self.grade3_stopped_unit_price),
            Grade::Grade3Estimated => {
                (self.grade3_estimated_quantity, self.grade3_estimated_unit_price)
            }
            Grade::GradeBelow => (self.grade_below_quantity, self.grade_below_unit_price),
            Grade::MixedGrade => (self.mixed_grade_quantity, self.mixed_grade_unit_price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    Grade1,
    Grade2,
    /// growth-stopped third grade
    Grade3Stopped,
    /// estimated third grade
    Grade3Estimated,
    GradeBelow,
    MixedGrade,
}

impl Grade {
    pub const ALL: [Grade; 6] = [
        Grade::Grade1,
        Grade::Grade2,
        Grade::Grade3Stopped,
        Grade::Grade3Estimated,
        Grade::GradeBelow,
        Grade::MixedGrade,
    ];
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Grade::Grade1 => "grade1",
            Grade::Grade2 => "grade2",
            Grade::Grade3Stopped => "grade3Stopped",
            Grade::Grade3Estimated => "grade3Estimated",
            Grade::GradeBelow => "gradeBelow",
            Grade::MixedGrade => "mixedGrade",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Snapshot wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: String,
    pub latest: String,
}

/// The remote snapshot as published by the ETL job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteDataset {
    pub version: String,
    pub total_records: u64,
    pub date_range: DateRange,
    pub regions: Vec<String>,
    pub unions: Vec<String>,
    pub data: Vec<AuctionRecord>,
}

/// Result of a version probe against the remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
}

// ---------------------------------------------------------------------------
// Cache provenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Opaque snapshot token: ETag, Last-Modified, or embedded version field.
    pub version: String,
    pub schema_version: String,
    pub total_records: u64,
    pub date_range_earliest: String,
    pub date_range_latest: String,
    pub regions: Vec<String>,
    pub unions: Vec<String>,
    /// RFC 3339 wall-clock time of the last cache write.
    pub last_updated: String,
}

// ---------------------------------------------------------------------------
// Loading state shared with subscribers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingState {
    pub is_loading: bool,
    pub is_initialized: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Inclusive date range plus optional region/union narrowing. A single
/// `region`/`union` takes precedence over the corresponding set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub union: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub unions: Vec<String>,
}

impl QueryFilters {
    pub fn between(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTotals {
    pub total_quantity: f64,
    pub total_amount: f64,
    pub record_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedData {
    pub by_region: BTreeMap<String, RegionTotals>,
    pub grade_averages: BTreeMap<Grade, f64>,
    pub total_records: u64,
}
