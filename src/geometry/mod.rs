pub mod projection;

use crate::error::ServiceError;

/// A WGS84 point in degrees.
///
/// Construction through [`GeoPoint::new`] enforces `-90 <= lat <= 90` and
/// `-180 <= lon <= 180`, so every `GeoPoint` in the system is in range.
///
/// # Example
///
/// ```rust
/// use geochange::GeoPoint;
///
/// let seattle = GeoPoint::new(47.6, -122.3).unwrap();
/// assert_eq!(seattle.lat(), 47.6);
/// assert_eq!(seattle.to_geojson_coordinates(), [-122.3, 47.6]);
///
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude, validating the WGS84 range.
    pub fn new(lat: f64, lon: f64) -> Result<Self, ServiceError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ServiceError::InvalidInput(format!(
                "Latitude {lat} is outside [-90, 90]"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ServiceError::InvalidInput(format!(
                "Longitude {lon} is outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    #[inline]
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// GeoJSON position order: `[lon, lat]`.
    #[inline]
    #[must_use]
    pub fn to_geojson_coordinates(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

impl TryFrom<(f64, f64)> for GeoPoint {
    type Error = ServiceError;

    /// Interprets the tuple as `(lat, lon)`.
    fn try_from((lat, lon): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(lat, lon)
    }
}

/// Axis-aligned rectangle in a single coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Smallest box containing all `points`. Returns `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = Self::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bbox.minx = bbox.minx.min(x);
            bbox.miny = bbox.miny.min(y);
            bbox.maxx = bbox.maxx.max(x);
            bbox.maxy = bbox.maxy.max(y);
        }
        Some(bbox)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// True when the interiors overlap. Boxes that only share an edge do not intersect.
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.minx < other.maxx
            && other.minx < self.maxx
            && self.miny < other.maxy
            && other.miny < self.maxy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geopoint_valid() {
        let p = GeoPoint::new(47.6, -122.3).unwrap();
        assert_eq!(p.lat(), 47.6);
        assert_eq!(p.lon(), -122.3);
    }

    #[test]
    fn test_geopoint_range_edges() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
        assert!(GeoPoint::new(90.0001, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_geopoint_from_tuple_is_lat_lon() {
        let p: GeoPoint = (10.0, 20.0).try_into().unwrap();
        assert_eq!(p.lat(), 10.0);
        assert_eq!(p.lon(), 20.0);
        assert_eq!(p.to_geojson_coordinates(), [20.0, 10.0]);
    }

    #[test]
    fn test_bbox_from_points() {
        let bbox = BoundingBox::from_points([(1.0, 5.0), (-2.0, 3.0), (4.0, -1.0)]).unwrap();
        assert_eq!(bbox, BoundingBox::new(-2.0, -1.0, 4.0, 5.0));
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn test_bbox_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&BoundingBox::new(5.0, 5.0, 15.0, 15.0)));
        assert!(a.intersects(&BoundingBox::new(2.0, 2.0, 3.0, 3.0)));
        assert!(!a.intersects(&BoundingBox::new(10.0, 0.0, 20.0, 10.0)));
        assert!(!a.intersects(&BoundingBox::new(-5.0, 11.0, 5.0, 12.0)));
    }
}
