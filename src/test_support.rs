//! Shared fixtures for unit tests: record builders, a throwaway store and an
//! in-memory snapshot source with call counters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tempfile::TempDir;

use crate::db::LocalStore;
use crate::error::{AppError, Result};
use crate::source::{HeadInfo, RangeFetch, SnapshotBody, SnapshotSource};
use crate::types::{AuctionRecord, CompleteDataset, DateRange};

pub fn record(date: &str, region: &str, union: &str, quantity: f64, unit_price: f64) -> AuctionRecord {
    AuctionRecord {
        id: None,
        date: date.to_string(),
        region: region.to_string(),
        union_name: union.to_string(),
        last_updated: None,
        auction_quantity_until_yesterday: 0.0,
        auction_quantity_today: quantity,
        auction_quantity_total: quantity,
        auction_amount_until_yesterday: 0.0,
        auction_amount_today: quantity * unit_price,
        auction_amount_total: quantity * unit_price,
        grade1_quantity: quantity,
        grade1_unit_price: unit_price,
        grade2_quantity: 0.0,
        grade2_unit_price: 0.0,
        grade3_stopped_quantity: 0.0,
        grade3_stopped_unit_price: 0.0,
        grade3_estimated_quantity: 0.0,
        grade3_estimated_unit_price: 0.0,
        grade_below_quantity: 0.0,
        grade_below_unit_price: 0.0,
        mixed_grade_quantity: 0.0,
        mixed_grade_unit_price: 0.0,
    }
}

/// One record per day, 2024-10-01 through 2024-10-31.
pub fn october_records() -> Vec<AuctionRecord> {
    (1..=31)
        .map(|day| record(&format!("2024-10-{day:02}"), "경북", "영덕", f64::from(day), 1000.0))
        .collect()
}

pub fn dataset(version: &str, data: Vec<AuctionRecord>) -> CompleteDataset {
    let mut regions: Vec<String> = data.iter().map(|r| r.region.clone()).collect();
    regions.sort();
    regions.dedup();
    let mut unions: Vec<String> = data.iter().map(|r| r.union_name.clone()).collect();
    unions.sort();
    unions.dedup();
    let earliest = data.iter().map(|r| r.date.clone()).min().unwrap_or_default();
    let latest = data.iter().map(|r| r.date.clone()).max().unwrap_or_default();

    CompleteDataset {
        version: version.to_string(),
        total_records: data.len() as u64,
        date_range: DateRange { earliest, latest },
        regions,
        unions,
        data,
    }
}

/// The two-record snapshot used in the end-to-end scenarios.
pub fn sample_dataset() -> CompleteDataset {
    dataset(
        "abc123",
        vec![
            record("2024-10-01", "강원", "홍천", 10.0, 1000.0),
            record("2024-10-02", "경북", "영덕", 20.0, 2000.0),
        ],
    )
}

pub async fn temp_store() -> (TempDir, LocalStore) {
    let dir = tempfile::tempdir().expect("failed to create temporary directory");
    let path = dir.path().join("cache.db");
    let store = LocalStore::open(path.to_str().expect("utf-8 temp path"), 1000)
        .await
        .expect("store should open");
    (dir, store)
}

// ---------------------------------------------------------------------------
// StubSource
// ---------------------------------------------------------------------------

struct Published {
    body: Vec<u8>,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// In-memory [`SnapshotSource`] serving a JSON body in small chunks.
pub struct StubSource {
    published: Mutex<Published>,
    range_supported: bool,
    chunk_size: usize,
    offline: AtomicBool,
    fail_status: Mutex<Option<u16>>,
    head_calls: AtomicUsize,
    range_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl StubSource {
    pub fn new(dataset: &CompleteDataset) -> Self {
        Self::from_body(serde_json::to_vec(dataset).expect("dataset serializes"))
    }

    pub fn from_body(body: Vec<u8>) -> Self {
        Self {
            published: Mutex::new(Published { body, etag: None, last_modified: None }),
            range_supported: true,
            chunk_size: 64,
            offline: AtomicBool::new(false),
            fail_status: Mutex::new(None),
            head_calls: AtomicUsize::new(0),
            range_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_etag(self, etag: &str) -> Self {
        self.published.lock().unwrap().etag = Some(etag.to_string());
        self
    }

    pub fn with_last_modified(self, last_modified: &str) -> Self {
        self.published.lock().unwrap().last_modified = Some(last_modified.to_string());
        self
    }

    pub fn without_range_support(mut self) -> Self {
        self.range_supported = false;
        self
    }

    /// Replace the served snapshot, as a republish on the server would.
    pub fn publish(&self, dataset: &CompleteDataset, etag: Option<&str>) {
        let mut published = self.published.lock().unwrap();
        published.body = serde_json::to_vec(dataset).expect("dataset serializes");
        published.etag = etag.map(str::to_string);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_with_status(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    /// `(head, range, full)` request counts.
    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.head_calls.load(Ordering::SeqCst),
            self.range_calls.load(Ordering::SeqCst),
            self.get_calls.load(Ordering::SeqCst),
        )
    }

    pub fn total_calls(&self) -> usize {
        let (head, range, full) = self.calls();
        head + range + full
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Unreachable("stub source is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for StubSource {
    fn url(&self) -> &str {
        "stub://auction-data/complete-dataset.json"
    }

    async fn head(&self) -> Result<HeadInfo> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let published = self.published.lock().unwrap();
        Ok(HeadInfo {
            etag: published.etag.clone(),
            last_modified: published.last_modified.clone(),
            content_length: Some(published.body.len() as u64),
        })
    }

    async fn fetch_prefix(&self, len: u64) -> Result<RangeFetch> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if !self.range_supported {
            return Ok(RangeFetch::Unsupported);
        }
        let published = self.published.lock().unwrap();
        let end = published.body.len().min(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(RangeFetch::Partial(published.body[..end].to_vec()))
    }

    async fn open(&self) -> Result<SnapshotBody> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(AppError::Status { url: self.url().to_string(), status });
        }

        let published = self.published.lock().unwrap();
        let head = HeadInfo {
            etag: published.etag.clone(),
            last_modified: published.last_modified.clone(),
            content_length: Some(published.body.len() as u64),
        };
        let chunks: Vec<Result<Vec<u8>>> = published
            .body
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();

        Ok(SnapshotBody { head, chunks: stream::iter(chunks).boxed() })
    }
}
