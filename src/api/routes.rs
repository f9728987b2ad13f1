use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::dataset_sync::SyncService;
use crate::error::AppError;
use crate::types::{AggregatedData, AuctionRecord, DatasetMetadata, LoadingState, QueryFilters};

/// Bounds used when a request leaves one end of the date range open.
const OPEN_START: &str = "0000-01-01";
const OPEN_END: &str = "9999-12-31";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SyncService>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/metadata", get(get_metadata))
        .route("/records", get(get_records))
        .route("/aggregate", get(get_aggregate))
        .route("/refresh", post(post_refresh))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

/// `regions` and `unions` arrive comma-separated: `?regions=강원,경북`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub region: Option<String>,
    pub union: Option<String>,
    pub regions: Option<String>,
    pub unions: Option<String>,
}

impl RecordsQuery {
    pub fn into_filters(self) -> QueryFilters {
        QueryFilters {
            start_date: self.start_date.unwrap_or_else(|| OPEN_START.to_string()),
            end_date: self.end_date.unwrap_or_else(|| OPEN_END.to_string()),
            region: self.region.filter(|s| !s.is_empty()),
            union: self.union.filter(|s| !s.is_empty()),
            regions: split_list(self.regions.as_deref()),
            unions: split_list(self.unions.as_deref()),
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_state(State(state): State<ApiState>) -> Json<LoadingState> {
    Json(state.service.get_state())
}

async fn get_metadata(
    State(state): State<ApiState>,
) -> Result<Json<Option<DatasetMetadata>>, AppError> {
    Ok(Json(state.service.get_metadata().await?))
}

async fn get_records(
    State(state): State<ApiState>,
    Query(params): Query<RecordsQuery>,
) -> Result<Json<Vec<AuctionRecord>>, AppError> {
    let filters = params.into_filters();
    let records = state.service.query_by_date_range(&filters).await?;
    Ok(Json(records))
}

async fn get_aggregate(
    State(state): State<ApiState>,
    Query(params): Query<RecordsQuery>,
) -> Result<Json<AggregatedData>, AppError> {
    let filters = params.into_filters();
    Ok(Json(state.service.get_aggregated_data(&filters).await?))
}

async fn post_refresh(State(state): State<ApiState>) -> Result<Json<LoadingState>, AppError> {
    info!("Refresh requested over HTTP");
    state.service.force_update().await?;
    Ok(Json(state.service.get_state()))
}
