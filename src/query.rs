//! Read side of the cache: filtered record queries and region/grade rollups.

use std::collections::BTreeMap;

use crate::dataset_sync::SyncService;
use crate::error::{AppError, Result};
use crate::types::{AggregatedData, AuctionRecord, DatasetMetadata, Grade, QueryFilters};

impl SyncService {
    /// Records inside `[start_date, end_date]` (inclusive) matching the
    /// region/union filters, ordered by date.
    pub async fn query_by_date_range(&self, filters: &QueryFilters) -> Result<Vec<AuctionRecord>> {
        self.ensure_ready()?;
        self.store().query_range(filters).await
    }

    pub async fn get_aggregated_data(&self, filters: &QueryFilters) -> Result<AggregatedData> {
        let records = self.query_by_date_range(filters).await?;
        Ok(aggregate(&records))
    }

    /// The stored metadata row, if a snapshot has ever been written.
    pub async fn get_metadata(&self) -> Result<Option<DatasetMetadata>> {
        self.store().read_metadata().await
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(AppError::NotReady)
        }
    }
}

/// Per-region totals plus the mean unit price of each grade, taken over the
/// records that actually sold that grade.
pub fn aggregate(records: &[AuctionRecord]) -> AggregatedData {
    let mut out = AggregatedData {
        total_records: records.len() as u64,
        ..AggregatedData::default()
    };

    for record in records {
        let totals = out.by_region.entry(record.region.clone()).or_default();
        totals.total_quantity += record.auction_quantity_total;
        totals.total_amount += record.auction_amount_total;
        totals.record_count += 1;
    }

    let mut sums: BTreeMap<Grade, (f64, u64)> = BTreeMap::new();
    for record in records {
        for grade in Grade::ALL {
            let (quantity, unit_price) = record.grade(grade);
            if quantity > 0.0 {
                let entry = sums.entry(grade).or_insert((0.0, 0));
                entry.0 += unit_price;
                entry.1 += 1;
            }
        }
    }
    out.grade_averages = Grade::ALL
        .into_iter()
        .map(|grade| {
            let avg = match sums.get(&grade) {
                Some(&(sum, n)) if n > 0 => sum / n as f64,
                _ => 0.0,
            };
            (grade, avg)
        })
        .collect();

    out
}
