//! Error types shared across the service.
//!
//! Low-level raster code returns [`AnyResult`]; every component boundary
//! converts into one of the [`ServiceError`] kinds before anything reaches
//! the HTTP layer.

use thiserror::Error;

/// Boxed error result used by the TIFF/COG reading layer.
pub type AnyResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Error kinds visible at the service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed date, coordinates, or cloud-cover value. No network call was made.
    #[error("{0}")]
    InvalidInput(String),

    /// The catalog returned no qualifying scene.
    #[error("{0}")]
    NotFound(String),

    /// A scene was found but it carries no displayable raster.
    #[error("{0}")]
    MissingAsset(String),

    /// The requested tile does not intersect the raster.
    #[error("tile is outside the raster bounds")]
    TileOutOfBounds,

    /// Catalog or raster storage failed. The message is safe to show to clients.
    #[error("{0}")]
    UpstreamFailure(String),
}

impl ServiceError {
    /// Short machine-readable code for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MissingAsset(_) => "MISSING_ASSET",
            Self::TileOutOfBounds => "TILE_OUT_OF_BOUNDS",
            Self::UpstreamFailure(_) => "UPSTREAM_FAILURE",
        }
    }
}

/// Result alias for service-level operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
