use super::AppState;
use crate::api::models::IngestResponse;
use crate::envelope::RawReading;
use crate::error::{AppError, Result};
use crate::model::BinRecord;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

/// GET /api/v1/bins
/// Returns every bin record, unset properties as null
pub async fn list_bins(State(state): State<AppState>) -> Result<Json<Vec<BinRecord>>> {
    let bins = state.ingestor.store().list_all().await?;
    Ok(Json(bins))
}

/// GET /api/v1/bins/{bin_id}
pub async fn get_bin(
    State(state): State<AppState>,
    Path(bin_id): Path<String>,
) -> Result<Json<BinRecord>> {
    state
        .ingestor
        .store()
        .get(&bin_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("bin {} not found", bin_id)))
}

/// POST /api/v1/bins
/// Ingests one reading through the same validation and merge as broker messages
pub async fn post_reading(
    State(state): State<AppState>,
    body: std::result::Result<Json<RawReading>, JsonRejection>,
) -> Result<Json<IngestResponse>> {
    let Json(reading) = body?;
    let bin = state.ingestor.ingest(&reading, "http").await?;
    Ok(Json(IngestResponse::stored(bin)))
}
