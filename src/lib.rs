//! # geochange - Satellite scene pairing and COG map tiles
//!
//! Backend for visual change detection: given a location and two dates, find
//! the least cloudy scene near each date in a STAC catalog and serve both as
//! slippy-map XYZ tiles rendered on the fly from Cloud Optimized GeoTIFFs.
//!
//! ## Features
//!
//! - **Catalog resolution**: one STAC item search per date, point intersection,
//!   cloud-cover ceiling, least cloudy then most recent
//! - **Range requests**: COG headers and tiles are read with HTTP Range requests;
//!   the full raster is never downloaded
//! - **Compression**: DEFLATE, LZW, ZSTD, JPEG and uncompressed tiles
//! - **Overviews**: pyramid level chosen from the tile's ground resolution
//! - **Coordinate transforms**: pure Rust proj4rs for non-Web-Mercator rasters
//! - **HTTP service**: axum endpoints for tiles and change-detection pairs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geochange::{SourceOptions, TileOutcome, extract_tile};
//!
//! let outcome = extract_tile("https://example.com/TCI.tif", 10, 164, 357, &SourceOptions::default())?;
//! if let TileOutcome::Png(bytes) = outcome {
//!     std::fs::write("tile.png", bytes)?;
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`stac`]: catalog search models and client behind the [`CatalogSearch`] trait
//! - [`resolver`]: one date to one scene
//! - [`pairing`]: two resolves into one paired response
//! - [`cog_reader`]: COG metadata parsing and tile reading
//! - [`xyz_tile`]: XYZ tile extraction with reprojection
//! - [`render`]: PNG encoding with transparency
//! - [`tiler`]: tile entry point used by the HTTP layer
//! - [`range_reader`]: I/O abstraction for HTTP and local sources
//! - [`http`]: axum router, handlers and error mapping

// ============================================================================
// Public modules
// ============================================================================

pub mod cog_reader;
pub mod config;
pub mod error;
pub mod geometry;
pub mod http;
pub mod pairing;
pub mod range_reader;
pub mod render;
pub mod resolver;
pub mod stac;
pub mod tiler;
pub mod xyz_tile;

#[cfg(test)]
mod test_fixtures;

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::{ConfigError, ServiceConfig};
pub use error::{AnyResult, ServiceError};

// ============================================================================
// Core COG Types
// ============================================================================

pub use cog_reader::{
    CogReader,
    CogMetadata,
    CogDataType,
    Compression,
    GeoTransform,
    OverviewMetadata,
};

// ============================================================================
// XYZ Tile Extraction
// ============================================================================

pub use xyz_tile::{
    TileImage,
    extract_xyz_tile,
    lonlat_to_tile,
    tile_bounds,
};
pub use render::encode_png;
pub use tiler::{TileError, TileOutcome, extract_tile, extract_tile_async};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, GeoPoint};
pub use geometry::projection::{
    CoordTransformer,
    get_proj_string,
    is_geographic_crs,
};

// ============================================================================
// Range Readers (I/O Abstraction)
// ============================================================================

pub use range_reader::{
    RangeReader,
    LocalRangeReader,
    HttpRangeReader,
    MemoryRangeReader,
    SourceOptions,
    create_range_reader,
};

// ============================================================================
// Catalog & Pairing
// ============================================================================

pub use stac::{CatalogError, CatalogSearch, SceneFeature, SceneQuery, StacClient};
pub use resolver::{CatalogResolver, ResolveOutcome};
pub use pairing::{ChangeDetectionParams, ChangeDetectionResponse, PairedImageInfo, PairingOrchestrator};
