//! HTTP handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::dto::{HealthResponse, TileQuery};
use super::error::{JsonError, TileResponseError};
use super::state::AppState;
use crate::error::ServiceError;
use crate::pairing::{ChangeDetectionParams, ChangeDetectionResponse};
use crate::tiler::{TileOutcome, extract_tile_async};
use crate::xyz_tile::MAX_ZOOM;

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/tiles/{z}/{x}/{y}?url=<source raster>
///
/// 200 with a PNG, 204 when the tile misses the raster, 400 without `url`,
/// 500 for anything else.
pub async fn get_tile(
    State(state): State<AppState>,
    Path((z, x, y)): Path<(u32, u32, u32)>,
    Query(query): Query<TileQuery>,
) -> Result<Response, TileResponseError> {
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return Err(crate::tiler::TileError::MissingSource.into());
    };

    let Some(z) = u8::try_from(z).ok().filter(|z| *z <= MAX_ZOOM) else {
        debug!(z, x, y, "Zoom above maximum, returning empty");
        return Err(ServiceError::TileOutOfBounds.into());
    };

    match extract_tile_async(url, z, x, y, state.source_options()).await? {
        TileOutcome::Png(bytes) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
        TileOutcome::Empty => Err(ServiceError::TileOutOfBounds.into()),
    }
}

/// GET /api/change-detection?lat=&lon=&date1=&date2=&cloudCover=
pub async fn change_detection(
    State(state): State<AppState>,
    Query(params): Query<ChangeDetectionParams>,
) -> Result<Json<ChangeDetectionResponse>, JsonError> {
    let request = params.validate(state.config.default_cloud_cover)?;
    let response = state.orchestrator.paired_change_detection(&request).await?;
    Ok(Json(response))
}
