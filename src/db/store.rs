use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::config::CURRENT_SCHEMA_VERSION;
use crate::db::models::MetadataRow;
use crate::db::schema::{self, AUCTION_COLUMNS};
use crate::error::Result;
use crate::types::{AuctionRecord, CompleteDataset, DatasetMetadata, QueryFilters};

/// Rows per INSERT statement. Keeps the bind count (22 per row) well under
/// SQLite's host parameter limit regardless of the configured batch size.
const MAX_ROWS_PER_STATEMENT: usize = 500;

/// Persistent, indexed cache of auction records plus the metadata row that
/// describes which snapshot they came from.
///
/// Every write that touches records runs in a single transaction, so a reader
/// sees either the complete previous dataset or the complete new one.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    batch_size: usize,
}

impl LocalStore {
    /// Open (creating if needed) the cache database at `db_path`.
    pub async fn open(db_path: &str, batch_size: usize) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool, batch_size: batch_size.max(1) };
        store.ensure_schema().await?;
        info!("Local store ready at {db_path}");
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        schema::create_all(&mut conn).await
    }

    /// Destroy and recreate every table. Structural migration only; callers
    /// refill the store afterwards.
    pub async fn reset_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        schema::drop_all(&mut tx).await?;
        schema::create_all(&mut tx).await?;
        tx.commit().await?;
        info!("Local store schema reset to {CURRENT_SCHEMA_VERSION}");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auction_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Replace all auction rows. All-or-nothing.
    pub async fn clear_and_bulk_insert(&self, records: &[AuctionRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM auction_data").execute(&mut *tx).await?;
        insert_batches(&mut tx, records, self.batch_size, &mut |_, _| {}).await?;
        tx.commit().await?;
        debug!("Replaced auction rows with {} records", records.len());
        Ok(())
    }

    /// Write a freshly downloaded snapshot: records and metadata in one
    /// transaction. `on_batch(inserted, total)` fires after every batch.
    pub async fn replace_dataset<F>(
        &self,
        dataset: &CompleteDataset,
        version_token: &str,
        mut on_batch: F,
    ) -> Result<DatasetMetadata>
    where
        F: FnMut(usize, usize) + Send,
    {
        let actual = dataset.data.len() as u64;
        if actual != dataset.total_records {
            warn!(
                declared = dataset.total_records,
                actual,
                "Snapshot totalRecords disagrees with its data array; recording actual count"
            );
        }

        let metadata = DatasetMetadata {
            id: None,
            version: version_token.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            total_records: actual,
            date_range_earliest: dataset.date_range.earliest.clone(),
            date_range_latest: dataset.date_range.latest.clone(),
            regions: dataset.regions.clone(),
            unions: dataset.unions.clone(),
            last_updated: now_rfc3339(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM auction_data").execute(&mut *tx).await?;
        insert_batches(&mut tx, &dataset.data, self.batch_size, &mut on_batch).await?;
        write_metadata(&mut tx, &metadata).await?;
        tx.commit().await?;

        Ok(metadata)
    }

    /// Latest metadata row, if the cache has ever been filled.
    pub async fn read_metadata(&self) -> Result<Option<DatasetMetadata>> {
        let row: Option<MetadataRow> = sqlx::query_as(
            r#"
            SELECT id, version, schema_version, total_records,
                   date_range_earliest, date_range_latest, regions, unions, last_updated
            FROM metadata
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(MetadataRow::into_metadata).transpose()
    }

    pub async fn replace_metadata(&self, metadata: &DatasetMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_metadata(&mut tx, metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Records with `start_date <= date <= end_date`, narrowed by region and
    /// union when given. Ordered by date, then insertion order.
    pub async fn query_range(&self, filters: &QueryFilters) -> Result<Vec<AuctionRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new("");
        push_range_select(&mut qb, filters);
        let records = qb
            .build_query_as::<AuctionRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}

fn push_range_select<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filters: &'a QueryFilters) {
    qb.push("SELECT id, ");
    qb.push(AUCTION_COLUMNS.join(", "));
    qb.push(" FROM auction_data WHERE date BETWEEN ");
    qb.push_bind(filters.start_date.as_str());
    qb.push(" AND ");
    qb.push_bind(filters.end_date.as_str());

    push_membership(qb, "region", filters.region.as_deref(), &filters.regions);
    push_membership(qb, "union_name", filters.union.as_deref(), &filters.unions);

    qb.push(" ORDER BY date, id");
}

/// `AND column = ?` for a single value, else `AND column IN (...)` for a
/// non-empty set, else nothing.
fn push_membership<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    column: &str,
    single: Option<&'a str>,
    set: &'a [String],
) {
    if let Some(value) = single {
        qb.push(format!(" AND {column} = "));
        qb.push_bind(value);
    } else if !set.is_empty() {
        qb.push(format!(" AND {column} IN ("));
        let mut separated = qb.separated(", ");
        for value in set {
            separated.push_bind(value.as_str());
        }
        separated.push_unseparated(")");
    }
}

async fn insert_batches<F>(
    conn: &mut SqliteConnection,
    records: &[AuctionRecord],
    batch_size: usize,
    on_batch: &mut F,
) -> Result<()>
where
    F: FnMut(usize, usize) + Send,
{
    let total = records.len();
    let mut inserted = 0usize;

    for batch in records.chunks(batch_size.max(1)) {
        for statement_rows in batch.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO auction_data (");
            qb.push(AUCTION_COLUMNS.join(", "));
            qb.push(") ");
            qb.push_values(statement_rows, |mut row, r| {
                row.push_bind(r.date.as_str())
                    .push_bind(r.region.as_str())
                    .push_bind(r.union_name.as_str())
                    .push_bind(r.last_updated.as_deref())
                    .push_bind(r.auction_quantity_until_yesterday)
                    .push_bind(r.auction_quantity_today)
                    .push_bind(r.auction_quantity_total)
                    .push_bind(r.auction_amount_until_yesterday)
                    .push_bind(r.auction_amount_today)
                    .push_bind(r.auction_amount_total)
                    .push_bind(r.grade1_quantity)
                    .push_bind(r.grade1_unit_price)
                    .push_bind(r.grade2_quantity)
                    .push_bind(r.grade2_unit_price)
                    .push_bind(r.grade3_stopped_quantity)
                    .push_bind(r.grade3_stopped_unit_price)
                    .push_bind(r.grade3_estimated_quantity)
                    .push_bind(r.grade3_estimated_unit_price)
                    .push_bind(r.grade_below_quantity)
                    .push_bind(r.grade_below_unit_price)
                    .push_bind(r.mixed_grade_quantity)
                    .push_bind(r.mixed_grade_unit_price);
            });
            qb.build().execute(&mut *conn).await?;
        }

        inserted += batch.len();
        on_batch(inserted, total);
    }

    Ok(())
}

async fn write_metadata(conn: &mut SqliteConnection, metadata: &DatasetMetadata) -> Result<()> {
    let regions = serde_json::to_string(&metadata.regions)?;
    let unions = serde_json::to_string(&metadata.unions)?;
    let total_records = i64::try_from(metadata.total_records).unwrap_or(i64::MAX);

    sqlx::query("DELETE FROM metadata").execute(&mut *conn).await?;
    sqlx::query(
        r#"
        INSERT INTO metadata (
            version, schema_version, total_records,
            date_range_earliest, date_range_latest, regions, unions, last_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&metadata.version)
    .bind(&metadata.schema_version)
    .bind(total_records)
    .bind(&metadata.date_range_earliest)
    .bind(&metadata.date_range_latest)
    .bind(regions)
    .bind(unions)
    .bind(&metadata.last_updated)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dataset, october_records, record, temp_store};

    #[tokio::test]
    async fn empty_store_has_no_metadata_and_no_rows() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.read_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_dataset_writes_records_and_metadata() {
        let (_dir, store) = temp_store().await;
        let snapshot = dataset("abc123", october_records());
        let mut batches = Vec::new();

        let metadata = store
            .replace_dataset(&snapshot, "\"etag-1\"", |done, total| batches.push((done, total)))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 31);
        assert_eq!(metadata.total_records, 31);
        assert_eq!(metadata.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(batches.last(), Some(&(31, 31)));

        let stored = store.read_metadata().await.unwrap().unwrap();
        assert_eq!(stored.version, "\"etag-1\"");
        assert_eq!(stored.regions, snapshot.regions);
        assert_eq!(stored.last_updated, metadata.last_updated);
    }

    #[tokio::test]
    async fn batches_report_progress_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let store = LocalStore::open(path.to_str().unwrap(), 10).await.unwrap();
        let mut batches = Vec::new();

        store
            .replace_dataset(&dataset("v", october_records()), "v", |done, total| {
                batches.push((done, total))
            })
            .await
            .unwrap();

        assert_eq!(batches, vec![(10, 31), (20, 31), (30, 31), (31, 31)]);
    }

    #[tokio::test]
    async fn replace_metadata_keeps_a_single_row() {
        let (_dir, store) = temp_store().await;
        let first = store
            .replace_dataset(&dataset("v1", october_records()), "v1", |_, _| {})
            .await
            .unwrap();

        let mut second = first.clone();
        second.version = "v2".to_string();
        store.replace_metadata(&second).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metadata")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(store.read_metadata().await.unwrap().unwrap().version, "v2");
    }

    #[tokio::test]
    async fn failed_insert_leaves_previous_dataset_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let store = LocalStore::open(path.to_str().unwrap(), 1000).await.unwrap();

        let before = vec![
            record("2024-09-01", "강원", "홍천", 1.0, 100.0),
            record("2024-09-02", "강원", "양양", 2.0, 200.0),
            record("2024-09-03", "경북", "영덕", 3.0, 300.0),
        ];
        store.clear_and_bulk_insert(&before).await.unwrap();

        // 2500 rows; the first full batch lands inside the transaction before
        // the malformed date in the second batch aborts it.
        let mut after: Vec<AuctionRecord> = (0..2500u32)
            .map(|i| record("2024-10-01", "경북", "영덕", f64::from(i), 1000.0))
            .collect();
        after[1500].date = "not-a-date".to_string();

        assert!(store.clear_and_bulk_insert(&after).await.is_err());

        assert_eq!(store.count().await.unwrap(), 3);
        let remaining = store
            .query_range(&QueryFilters::between("2024-01-01", "2024-12-31"))
            .await
            .unwrap();
        let dates: Vec<_> = remaining.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-09-01", "2024-09-02", "2024-09-03"]);
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_records_and_metadata() {
        let (_dir, store) = temp_store().await;
        let first = store
            .replace_dataset(&dataset("v1", october_records()), "v1", |_, _| {})
            .await
            .unwrap();

        // 2500 rows at batch size 1000: the first batch is written before the
        // malformed date in the second one aborts the transaction.
        let mut rows: Vec<AuctionRecord> = (0..2500u32)
            .map(|i| record("2024-11-01", "경북", "영덕", f64::from(i), 1000.0))
            .collect();
        rows[1500].date = "2024/11/02".to_string();
        let mut batches = 0;
        let result = store
            .replace_dataset(&dataset("v2", rows), "v2", |_, _| batches += 1)
            .await;

        assert!(result.is_err());
        assert_eq!(batches, 1);
        assert_eq!(store.count().await.unwrap(), 31);
        let kept = store.read_metadata().await.unwrap().unwrap();
        assert_eq!(kept.version, "v1");
        assert_eq!(kept.total_records, 31);
        assert_eq!(kept.last_updated, first.last_updated);
    }

    #[tokio::test]
    async fn range_query_is_inclusive_on_both_ends() {
        let (_dir, store) = temp_store().await;
        store.clear_and_bulk_insert(&october_records()).await.unwrap();

        let rows = store
            .query_range(&QueryFilters::between("2024-10-05", "2024-10-10"))
            .await
            .unwrap();

        let dates: Vec<_> = rows.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(
            dates,
            vec!["2024-10-05", "2024-10-06", "2024-10-07", "2024-10-08", "2024-10-09", "2024-10-10"]
        );
        assert!(rows.iter().all(|r| r.id.is_some()));
    }

    #[tokio::test]
    async fn region_and_union_filters_narrow_results() {
        let (_dir, store) = temp_store().await;
        let records = vec![
            record("2024-10-01", "강원", "홍천", 1.0, 100.0),
            record("2024-10-01", "경북", "영덕", 2.0, 200.0),
            record("2024-10-02", "경북", "청송", 3.0, 300.0),
            record("2024-10-03", "경남", "거창", 4.0, 400.0),
        ];
        store.clear_and_bulk_insert(&records).await.unwrap();

        let mut filters = QueryFilters::between("2024-10-01", "2024-10-31");
        filters.region = Some("경북".to_string());
        let rows = store.query_range(&filters).await.unwrap();
        assert_eq!(rows.len(), 2);

        filters.union = Some("청송".to_string());
        let rows = store.query_range(&filters).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].union_name, "청송");

        let mut sets = QueryFilters::between("2024-10-01", "2024-10-31");
        sets.regions = vec!["강원".to_string(), "경남".to_string()];
        let rows = store.query_range(&sets).await.unwrap();
        let unions: Vec<_> = rows.iter().map(|r| r.union_name.as_str()).collect();
        assert_eq!(unions, vec!["홍천", "거창"]);

        // A single region wins over the region set.
        sets.region = Some("경북".to_string());
        sets.unions = vec!["영덕".to_string()];
        let rows = store.query_range(&sets).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].union_name, "영덕");
    }

    #[tokio::test]
    async fn date_range_predicate_uses_an_index() {
        let (_dir, store) = temp_store().await;
        store.clear_and_bulk_insert(&october_records()).await.unwrap();

        let filters = QueryFilters::between("2024-10-05", "2024-10-10");
        let mut qb = QueryBuilder::<Sqlite>::new("EXPLAIN QUERY PLAN ");
        push_range_select(&mut qb, &filters);
        let rows = qb.build().fetch_all(&store.pool).await.unwrap();

        use sqlx::Row;
        let plan: Vec<String> = rows.iter().map(|r| r.get::<String, _>("detail")).collect();
        assert!(
            plan.iter().any(|d| d.contains("USING INDEX") && d.contains("date")),
            "expected an index search on date, got {plan:?}"
        );
    }

    #[tokio::test]
    async fn reset_schema_drops_all_rows() {
        let (_dir, store) = temp_store().await;
        store
            .replace_dataset(&dataset("v1", october_records()), "v1", |_, _| {})
            .await
            .unwrap();

        store.reset_schema().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.read_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_metadata_without_schema_version_reads_as_legacy() {
        let (_dir, store) = temp_store().await;
        sqlx::query(
            r#"INSERT INTO metadata (version, schema_version, total_records, date_range_earliest,
               date_range_latest, regions, unions, last_updated)
               VALUES ('old', NULL, 0, '', '', '[]', '[]', '2020-01-01T00:00:00.000Z')"#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let metadata = store.read_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.schema_version, crate::config::LEGACY_SCHEMA_VERSION);
    }
}
