//! XYZ tile extraction from COG files
//!
//! Maps a Web Mercator tile onto the raster's pixel grid, picks an overview
//! level, and samples bands 1-3 with nearest neighbour into a fixed
//! 256x256 RGB image plus validity mask.
//!
//! # Example
//!
//! ```rust,ignore
//! use geochange::{CogReader, SourceOptions, xyz_tile::extract_xyz_tile};
//!
//! let reader = CogReader::open("https://example.com/visual.tif", &SourceOptions::default())?;
//! match extract_xyz_tile(&reader, 10, 164, 357)? {
//!     Some(tile) => println!("{} valid pixels", tile.valid_count()),
//!     None => println!("tile does not touch the raster"),
//! }
//! ```

use std::collections::hash_map::Entry;

use ahash::AHashMap;
use tracing::debug;

use crate::cog_reader::CogReader;
use crate::error::AnyResult;
use crate::geometry::BoundingBox;
use crate::geometry::projection::{
    CoordTransformer, EPSG_WEB_MERCATOR, EPSG_WGS84, HALF_EARTH, lat_to_merc_y, lon_to_merc_x,
    merc_x_to_lon, merc_y_to_lat,
};

/// Output tile edge in pixels
pub const TILE_SIZE: usize = 256;

/// Highest zoom for which tile indices fit comfortably in `u32`
pub const MAX_ZOOM: u8 = 30;

/// Web Mercator world width in meters
const WORLD_SIZE: f64 = 40_075_016.685_578_49;

/// Points sampled along each raster edge when projecting its extent
const EDGE_SAMPLES: usize = 21;

/// Rendered tile: RGB samples plus a per-pixel validity mask
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pub width: usize,
    pub height: usize,
    /// Interleaved R,G,B bytes, row-major
    pub rgb: Vec<u8>,
    /// `true` where the pixel holds valid raster data
    pub mask: Vec<bool>,
}

impl TileImage {
    fn empty() -> Self {
        Self {
            width: TILE_SIZE,
            height: TILE_SIZE,
            rgb: vec![0; TILE_SIZE * TILE_SIZE * 3],
            mask: vec![false; TILE_SIZE * TILE_SIZE],
        }
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }
}

/// Web Mercator footprint of tile (z, x, y).
///
/// Returns `None` when the zoom is above [`MAX_ZOOM`] or x/y fall outside the
/// `2^z` grid.
#[must_use]
pub fn tile_bounds(z: u8, x: u32, y: u32) -> Option<BoundingBox> {
    if z > MAX_ZOOM {
        return None;
    }
    let n = 1u64 << z;
    if u64::from(x) >= n || u64::from(y) >= n {
        return None;
    }

    let tile_span = WORLD_SIZE / n as f64;
    let minx = -HALF_EARTH + f64::from(x) * tile_span;
    let maxy = HALF_EARTH - f64::from(y) * tile_span;
    Some(BoundingBox::new(minx, maxy - tile_span, minx + tile_span, maxy))
}

/// Tile (x, y) containing a WGS84 position at zoom `z`
#[must_use]
pub fn lonlat_to_tile(lon: f64, lat: f64, z: u8) -> (u32, u32) {
    let n = (1u64 << z.min(MAX_ZOOM)) as f64;
    let fx = (lon_to_merc_x(lon) + HALF_EARTH) / WORLD_SIZE * n;
    let fy = (HALF_EARTH - lat_to_merc_y(lat)) / WORLD_SIZE * n;
    let clamp = |v: f64| v.floor().clamp(0.0, n - 1.0) as u32;
    (clamp(fx), clamp(fy))
}

/// Coordinate mapping between Web Mercator and the raster CRS
enum TransformStrategy {
    Identity,
    MercToGeo,
    GeoToMerc,
    Proj4rs(CoordTransformer),
}

impl TransformStrategy {
    /// Web Mercator -> raster CRS
    fn to_source(epsg: i32) -> AnyResult<Self> {
        Ok(match epsg {
            EPSG_WEB_MERCATOR => Self::Identity,
            EPSG_WGS84 => Self::MercToGeo,
            _ => Self::Proj4rs(CoordTransformer::new(EPSG_WEB_MERCATOR, epsg)?),
        })
    }

    /// Raster CRS -> Web Mercator
    fn from_source(epsg: i32) -> AnyResult<Self> {
        Ok(match epsg {
            EPSG_WEB_MERCATOR => Self::Identity,
            EPSG_WGS84 => Self::GeoToMerc,
            _ => Self::Proj4rs(CoordTransformer::new(epsg, EPSG_WEB_MERCATOR)?),
        })
    }

    #[inline(always)]
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        match self {
            Self::Identity => Ok((x, y)),
            Self::MercToGeo => Ok((merc_x_to_lon(x), merc_y_to_lat(y))),
            Self::GeoToMerc => Ok((lon_to_merc_x(x), lat_to_merc_y(y))),
            Self::Proj4rs(t) => t.transform(x, y),
        }
    }
}

/// Extract tile (z, x, y) from the raster.
///
/// Returns `Ok(None)` when the tile does not intersect the raster extent (or
/// lies outside the tile grid). Any read or decode failure is an error; a
/// partially filled tile is never returned.
pub fn extract_xyz_tile(reader: &CogReader, z: u8, x: u32, y: u32) -> AnyResult<Option<TileImage>> {
    let Some(bounds) = tile_bounds(z, x, y) else {
        debug!(z, x, y, "Tile index outside the zoom grid");
        return Ok(None);
    };

    let meta = &reader.metadata;
    let geo_transform = meta.geo_transform.ok_or("Raster is not georeferenced")?;
    if meta.bands < 3 {
        return Err(format!("Expected at least 3 bands, raster has {}", meta.bands).into());
    }

    let epsg = meta.crs_code.unwrap_or(EPSG_WEB_MERCATOR);

    let extent = raster_extent_3857(reader, epsg)?;
    if !extent.intersects(&bounds) {
        debug!(z, x, y, source = reader.identifier(), "Tile outside raster bounds");
        return Ok(None);
    }

    let to_source = TransformStrategy::to_source(epsg)?;
    let overview_idx = choose_overview(reader, &bounds, &to_source)?;
    let grid = reader
        .grid(overview_idx)
        .ok_or("Selected overview does not exist")?;
    let (scale_x, scale_y) = overview_idx
        .and_then(|idx| reader.overviews.get(idx))
        .map_or((1.0, 1.0), |ovr| (ovr.scale_x, ovr.scale_y));

    debug!(z, x, y, overview = ?overview_idx, "Sampling tile");

    let bands = meta.bands;
    let nodata = meta.nodata;
    let res = bounds.width() / TILE_SIZE as f64;
    let mut image = TileImage::empty();
    let mut tiles: AHashMap<usize, Vec<f32>> = AHashMap::new();

    for row in 0..TILE_SIZE {
        let merc_y = bounds.maxy - (row as f64 + 0.5) * res;

        for col in 0..TILE_SIZE {
            let merc_x = bounds.minx + (col as f64 + 0.5) * res;
            let Ok((world_x, world_y)) = to_source.transform(merc_x, merc_y) else {
                continue;
            };

            let (px, py) = geo_transform.world_to_pixel(world_x, world_y);
            let (lx, ly) = ((px / scale_x).floor(), (py / scale_y).floor());
            if !(lx >= 0.0 && ly >= 0.0 && lx < grid.width as f64 && ly < grid.height as f64) {
                continue;
            }
            let (lx, ly) = (lx as usize, ly as usize);
            let Some(tile_idx) = grid.tile_index_for_pixel(lx, ly) else {
                continue;
            };

            let data = match tiles.entry(tile_idx) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(match overview_idx {
                    Some(ovr) => reader.read_overview_tile(ovr, tile_idx)?,
                    None => reader.read_tile(tile_idx)?,
                }),
            };

            let (ox, oy) = grid.tile_origin(tile_idx);
            let base = ((ly - oy) * grid.tile_width + (lx - ox)) * bands;
            let sample = data
                .get(base..base + 3)
                .ok_or("Decoded tile is shorter than its grid")?;

            if sample.iter().any(|v| v.is_nan()) {
                continue;
            }
            if let Some(nd) = nodata
                && sample.iter().all(|&v| f64::from(v) == nd)
            {
                continue;
            }

            let out = row * TILE_SIZE + col;
            for (band, &value) in sample.iter().enumerate() {
                image.rgb[out * 3 + band] = value.round().clamp(0.0, 255.0) as u8;
            }
            image.mask[out] = true;
        }
    }

    debug!(z, x, y, tiles_read = tiles.len(), valid = image.valid_count(), "Tile sampled");

    Ok(Some(image))
}

/// Raster extent projected to Web Mercator, densified along its edges
fn raster_extent_3857(reader: &CogReader, epsg: i32) -> AnyResult<BoundingBox> {
    let native = reader.native_extent().ok_or("Raster is not georeferenced")?;
    let from_source = TransformStrategy::from_source(epsg)?;

    let step = |i: usize| i as f64 / (EDGE_SAMPLES - 1) as f64;
    let mut edge_points = Vec::with_capacity(EDGE_SAMPLES * 4);
    for i in 0..EDGE_SAMPLES {
        let x = native.minx + native.width() * step(i);
        let y = native.miny + native.height() * step(i);
        edge_points.push((x, native.miny));
        edge_points.push((x, native.maxy));
        edge_points.push((native.minx, y));
        edge_points.push((native.maxx, y));
    }

    let projected = edge_points
        .into_iter()
        .filter_map(|(x, y)| from_source.transform(x, y).ok())
        .filter(|(x, y)| x.is_finite() && y.is_finite());

    BoundingBox::from_points(projected)
        .ok_or_else(|| "Raster extent cannot be projected to EPSG:3857".into())
}

/// Overview level whose resolution best matches the output tile
fn choose_overview(
    reader: &CogReader,
    bounds: &BoundingBox,
    to_source: &TransformStrategy,
) -> AnyResult<Option<usize>> {
    let Some(geo_transform) = reader.metadata.geo_transform else {
        return Ok(None);
    };

    // 3x3 grid of sample points across the tile, in full-resolution pixels
    let mut pixels = Vec::with_capacity(9);
    for fy in [0.0, 0.5, 1.0] {
        for fx in [0.0, 0.5, 1.0] {
            let mx = bounds.minx + bounds.width() * fx;
            let my = bounds.miny + bounds.height() * fy;
            if let Ok((wx, wy)) = to_source.transform(mx, my) {
                pixels.push(geo_transform.world_to_pixel(wx, wy));
            }
        }
    }

    let Some(footprint) = BoundingBox::from_points(pixels) else {
        return Ok(None);
    };
    Ok(reader.best_overview_for_resolution(footprint.width(), footprint.height(), TILE_SIZE))
}
