//! Coordinate transforms between EPSG codes using pure Rust (proj4rs + crs-definitions).
//!
//! Web Mercator <-> WGS84 is handled with inline math since it is the hot path
//! for tiles over geographic rasters; everything else goes through proj4rs.

use std::f64::consts::PI;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

pub const EPSG_WGS84: i32 = 4326;
pub const EPSG_WEB_MERCATOR: i32 = 3857;

/// Half the earth's circumference in Web Mercator meters
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Latitude limit of the square Web Mercator world
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Web Mercator X (meters) to longitude (degrees)
#[inline(always)]
#[must_use]
pub fn merc_x_to_lon(x: f64) -> f64 {
    x * 180.0 / HALF_EARTH
}

/// Web Mercator Y (meters) to latitude (degrees)
#[inline(always)]
#[must_use]
pub fn merc_y_to_lat(y: f64) -> f64 {
    let y_rad = y * PI / HALF_EARTH;
    (2.0 * y_rad.exp().atan() - PI / 2.0).to_degrees()
}

/// Longitude (degrees) to Web Mercator X (meters)
#[inline(always)]
#[must_use]
pub fn lon_to_merc_x(lon: f64) -> f64 {
    lon * HALF_EARTH / 180.0
}

/// Latitude (degrees) to Web Mercator Y (meters). Latitudes are clamped to the Mercator limit.
#[inline(always)]
#[must_use]
pub fn lat_to_merc_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * HALF_EARTH / PI
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == EPSG_WGS84 || (4000..5000).contains(&epsg)
    }
}

/// Reusable transformer between two EPSG codes.
pub struct CoordTransformer {
    source_proj: Proj,
    target_proj: Proj,
    source_epsg: i32,
    target_epsg: i32,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, String> {
        let source_str = get_proj_string(source_epsg)
            .ok_or_else(|| format!("EPSG:{source_epsg} is not in the crs-definitions database"))?;
        let target_str = get_proj_string(target_epsg)
            .ok_or_else(|| format!("EPSG:{target_epsg} is not in the crs-definitions database"))?;

        let source_proj = Proj::from_proj_string(source_str)
            .map_err(|e| format!("Invalid source projection EPSG:{source_epsg}: {e:?}"))?;
        let target_proj = Proj::from_proj_string(target_str)
            .map_err(|e| format!("Invalid target projection EPSG:{target_epsg}: {e:?}"))?;

        Ok(Self {
            source_proj,
            target_proj,
            source_epsg,
            target_epsg,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    /// Transform a single coordinate. Geographic coordinates are in degrees on both sides.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        // proj4rs works in radians for geographic systems
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(&self.source_proj, &self.target_proj, &mut point).map_err(|e| {
            format!(
                "Transform from EPSG:{} to EPSG:{} failed: {e:?}",
                self.source_epsg, self.target_epsg
            )
        })?;

        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}
