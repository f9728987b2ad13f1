//! Table and index layout of the local cache database.
//!
//! Any change here must be paired with a bump of
//! [`CURRENT_SCHEMA_VERSION`](crate::config::CURRENT_SCHEMA_VERSION) so existing
//! caches are dropped and rebuilt instead of being read with the wrong layout.

use sqlx::SqliteConnection;

use crate::error::Result;

pub const AUCTION_TABLE: &str = "auction_data";
pub const METADATA_TABLE: &str = "metadata";

/// Columns written on insert, in bind order. `id` is assigned by SQLite.
pub const AUCTION_COLUMNS: &[&str] = &[
    "date",
    "region",
    "union_name",
    "last_updated",
    "auction_quantity_until_yesterday",
    "auction_quantity_today",
    "auction_quantity_total",
    "auction_amount_until_yesterday",
    "auction_amount_today",
    "auction_amount_total",
    "grade1_quantity",
    "grade1_unit_price",
    "grade2_quantity",
    "grade2_unit_price",
    "grade3_stopped_quantity",
    "grade3_stopped_unit_price",
    "grade3_estimated_quantity",
    "grade3_estimated_unit_price",
    "grade_below_quantity",
    "grade_below_unit_price",
    "mixed_grade_quantity",
    "mixed_grade_unit_price",
];

const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS auction_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL
            CHECK (date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
        region TEXT NOT NULL,
        union_name TEXT NOT NULL,
        last_updated TEXT,
        auction_quantity_until_yesterday REAL NOT NULL,
        auction_quantity_today REAL NOT NULL,
        auction_quantity_total REAL NOT NULL,
        auction_amount_until_yesterday REAL NOT NULL,
        auction_amount_today REAL NOT NULL,
        auction_amount_total REAL NOT NULL,
        grade1_quantity REAL NOT NULL,
        grade1_unit_price REAL NOT NULL,
        grade2_quantity REAL NOT NULL,
        grade2_unit_price REAL NOT NULL,
        grade3_stopped_quantity REAL NOT NULL,
        grade3_stopped_unit_price REAL NOT NULL,
        grade3_estimated_quantity REAL NOT NULL,
        grade3_estimated_unit_price REAL NOT NULL,
        grade_below_quantity REAL NOT NULL,
        grade_below_unit_price REAL NOT NULL,
        mixed_grade_quantity REAL NOT NULL,
        mixed_grade_unit_price REAL NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_auction_date ON auction_data (date)",
    "CREATE INDEX IF NOT EXISTS idx_auction_region ON auction_data (region)",
    "CREATE INDEX IF NOT EXISTS idx_auction_union ON auction_data (union_name)",
    "CREATE INDEX IF NOT EXISTS idx_auction_date_region ON auction_data (date, region)",
    "CREATE INDEX IF NOT EXISTS idx_auction_date_union ON auction_data (date, union_name)",
    "CREATE INDEX IF NOT EXISTS idx_auction_region_union ON auction_data (region, union_name)",
    "CREATE INDEX IF NOT EXISTS idx_auction_date_region_union ON auction_data (date, region, union_name)",
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        version TEXT NOT NULL,
        schema_version TEXT,
        total_records INTEGER NOT NULL,
        date_range_earliest TEXT NOT NULL,
        date_range_latest TEXT NOT NULL,
        regions TEXT NOT NULL,
        unions TEXT NOT NULL,
        last_updated TEXT NOT NULL
    )
    "#,
];

/// Create any missing tables and indexes. Existing tables are left untouched.
pub async fn create_all(conn: &mut SqliteConnection) -> Result<()> {
    for statement in CREATE_STATEMENTS {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Drop every table owned by the cache, including their indexes.
pub async fn drop_all(conn: &mut SqliteConnection) -> Result<()> {
    for table in [AUCTION_TABLE, METADATA_TABLE] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
