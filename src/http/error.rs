//! Mapping of service errors onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::dto::ErrorBody;
use crate::error::ServiceError;

/// Status code for each error kind.
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) | ServiceError::MissingAsset(_) => StatusCode::NOT_FOUND,
        ServiceError::TileOutOfBounds => StatusCode::NO_CONTENT,
        ServiceError::UpstreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error for JSON endpoints, rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct JsonError(pub ServiceError);

impl From<ServiceError> for JsonError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

/// Error for the tile endpoint, rendered as plain text.
///
/// [`ServiceError::TileOutOfBounds`] becomes `204 No Content` with an empty body.
#[derive(Debug)]
pub struct TileResponseError(pub ServiceError);

impl From<ServiceError> for TileResponseError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<crate::tiler::TileError> for TileResponseError {
    fn from(err: crate::tiler::TileError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for TileResponseError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        match self.0 {
            ServiceError::TileOutOfBounds => status.into_response(),
            err => (status, err.to_string()).into_response(),
        }
    }
}
