//! Raster tile extraction entry point.
//!
//! Opens the source raster for every call, renders the requested XYZ tile,
//! and classifies the result as an image, an empty (out-of-bounds) tile, or
//! a failure. Nothing is cached between calls.

use thiserror::Error;
use tracing::{debug, error};

use crate::cog_reader::CogReader;
use crate::error::ServiceError;
use crate::range_reader::SourceOptions;
use crate::render::encode_png;
use crate::xyz_tile::extract_xyz_tile;

/// Successful tile extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    /// PNG-encoded tile
    Png(Vec<u8>),
    /// The tile does not intersect the raster
    Empty,
}

#[derive(Error, Debug)]
pub enum TileError {
    /// No raster source was supplied
    #[error("missing raster source")]
    MissingSource,

    /// Opening, reading, decoding or encoding failed
    #[error("failed to render tile from {source_url}: {message}")]
    Render { source_url: String, message: String },

    /// The blocking worker panicked or was cancelled
    #[error("tile task failed: {0}")]
    Task(String),
}

impl From<TileError> for ServiceError {
    fn from(err: TileError) -> Self {
        match err {
            TileError::MissingSource => Self::InvalidInput("Missing 'url' query parameter".to_string()),
            TileError::Render { .. } | TileError::Task(_) => {
                Self::UpstreamFailure("Failed to generate tile".to_string())
            }
        }
    }
}

/// Render tile (z, x, y) of `source_url` as PNG.
///
/// Blocking: performs synchronous range requests. Use [`extract_tile_async`]
/// from async code.
pub fn extract_tile(source_url: &str, z: u8, x: u32, y: u32, options: &SourceOptions) -> Result<TileOutcome, TileError> {
    if source_url.trim().is_empty() {
        return Err(TileError::MissingSource);
    }

    let render_error = |e: Box<dyn std::error::Error + Send + Sync>| {
        let err = TileError::Render {
            source_url: source_url.to_string(),
            message: e.to_string(),
        };
        error!(z, x, y, error = %err, "Tile extraction failed");
        err
    };

    let reader = CogReader::open(source_url, options).map_err(render_error)?;
    match extract_xyz_tile(&reader, z, x, y).map_err(render_error)? {
        None => {
            debug!(z, x, y, source = source_url, "Tile outside raster, returning empty");
            Ok(TileOutcome::Empty)
        }
        Some(tile) => Ok(TileOutcome::Png(encode_png(&tile).map_err(render_error)?)),
    }
}

/// Run [`extract_tile`] on tokio's blocking thread pool.
pub async fn extract_tile_async(
    source_url: String,
    z: u8,
    x: u32,
    y: u32,
    options: SourceOptions,
) -> Result<TileOutcome, TileError> {
    tokio::task::spawn_blocking(move || extract_tile(&source_url, z, x, y, &options))
        .await
        .map_err(|e| {
            error!(error = %e, "Tile task join error");
            TileError::Task(e.to_string())
        })?
}
