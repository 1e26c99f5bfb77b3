//! STAC item-search request and response models.
//!
//! Only the subset the resolver needs is modelled: point intersection,
//! datetime range, cloud-cover filter and sort order on the request side;
//! id, bbox, datetime, cloud cover and assets on the response side.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::geometry::GeoPoint;

use super::CatalogError;

/// Asset key of the true-colour composite
pub const VISUAL_ASSET: &str = "visual";

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Closed day interval `[target - radius, target + radius]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Window centred on `target`. Saturates at the calendar limits.
    #[must_use]
    pub fn around(target: NaiveDate, radius_days: u32) -> Self {
        let radius = Days::new(u64::from(radius_days));
        Self {
            start: target.checked_sub_days(radius).unwrap_or(NaiveDate::MIN),
            end: target.checked_add_days(radius).unwrap_or(NaiveDate::MAX),
        }
    }
}

impl fmt::Display for DateWindow {
    /// STAC datetime interval with explicit start/end-of-day boundaries in UTC
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}T00:00:00Z/{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// One catalog lookup: best scene over a point within a date window
#[derive(Debug, Clone, PartialEq)]
pub struct SceneQuery {
    pub point: GeoPoint,
    pub window: DateWindow,
    /// Exclusive upper bound on `eo:cloud_cover`
    pub cloud_cover_ceiling: u8,
    pub collection: String,
    pub limit: u32,
}

impl SceneQuery {
    #[must_use]
    pub fn new(point: GeoPoint, window: DateWindow, cloud_cover_ceiling: u8, collection: impl Into<String>) -> Self {
        Self {
            point,
            window,
            cloud_cover_ceiling,
            collection: collection.into(),
            limit: 1,
        }
    }

    /// POST body for the item-search endpoint
    #[must_use]
    pub fn to_search_body(&self) -> StacSearchBody {
        let mut query = BTreeMap::new();
        query.insert(
            "eo:cloud_cover".to_string(),
            QueryFilter {
                lt: self.cloud_cover_ceiling,
            },
        );

        StacSearchBody {
            intersects: GeoJsonPoint {
                type_: "Point".to_string(),
                coordinates: self.point.to_geojson_coordinates(),
            },
            collections: vec![self.collection.clone()],
            datetime: self.window.to_string(),
            limit: self.limit,
            sortby: vec![
                SortBy::new("properties.eo:cloud_cover", SortDirection::Asc),
                SortBy::new("properties.datetime", SortDirection::Desc),
            ],
            query,
        }
    }
}

/// Body for `POST /search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacSearchBody {
    pub intersects: GeoJsonPoint,
    pub collections: Vec<String>,
    pub datetime: String,
    pub limit: u32,
    pub sortby: Vec<SortBy>,
    pub query: BTreeMap<String, QueryFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonPoint {
    #[serde(rename = "type")]
    pub type_: String,
    /// `[lon, lat]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

impl SortBy {
    fn new(field: &str, direction: SortDirection) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }
}

/// STAC query-extension comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub lt: u8,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A STAC item collection (GeoJSON `FeatureCollection`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItemCollection {
    pub features: Vec<StacItem>,
}

/// A single STAC item (GeoJSON `Feature`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,

    /// `[west, south, east, north]`, or the 3D form with min/max elevation
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItemProperties {
    /// ISO 8601 acquisition time
    #[serde(default)]
    pub datetime: Option<String>,

    #[serde(rename = "eo:cloud_cover", default, skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
}

// ---------------------------------------------------------------------------
// Domain result
// ---------------------------------------------------------------------------

/// Scene selected by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFeature {
    pub id: String,
    /// URL of the `visual` asset, when the item has one
    pub asset_href: Option<String>,
    /// `[west, south, east, north]` in degrees
    pub bounding_box: [f64; 4],
    /// Acquisition time as reported by the catalog
    pub acquired_at: String,
    pub cloud_cover: Option<f64>,
}

impl TryFrom<StacItem> for SceneFeature {
    type Error = CatalogError;

    fn try_from(item: StacItem) -> Result<Self, Self::Error> {
        let bounding_box = match item.bbox.as_deref() {
            Some([w, s, e, n]) => [*w, *s, *e, *n],
            Some([w, s, _, e, n, _]) => [*w, *s, *e, *n],
            _ => {
                return Err(CatalogError::Schema(format!(
                    "item {} has no 2D or 3D bbox",
                    item.id
                )));
            }
        };

        let acquired_at = item
            .properties
            .datetime
            .ok_or_else(|| CatalogError::Schema(format!("item {} has no datetime", item.id)))?;

        let asset_href = item.assets.get(VISUAL_ASSET).map(|asset| asset.href.clone());

        Ok(Self {
            id: item.id,
            asset_href,
            bounding_box,
            acquired_at,
            cloud_cover: item.properties.eo_cloud_cover,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_window_interval() {
        let window = DateWindow::around(date("2024-06-15"), 15);
        assert_eq!(window.start, date("2024-05-31"));
        assert_eq!(window.end, date("2024-06-30"));
        assert_eq!(window.to_string(), "2024-05-31T00:00:00Z/2024-06-30T23:59:59Z");
    }

    #[test]
    fn test_window_crosses_year() {
        let window = DateWindow::around(date("2024-01-05"), 15);
        assert_eq!(window.to_string(), "2023-12-21T00:00:00Z/2024-01-20T23:59:59Z");
    }

    #[test]
    fn test_search_body_shape() {
        let point = GeoPoint::new(47.6, -122.3).unwrap();
        let query = SceneQuery::new(point, DateWindow::around(date("2024-06-15"), 15), 20, "sentinel-2-l2a");
        let body = serde_json::to_value(query.to_search_body()).unwrap();

        assert_eq!(
            body,
            json!({
                "intersects": {"type": "Point", "coordinates": [-122.3, 47.6]},
                "collections": ["sentinel-2-l2a"],
                "datetime": "2024-05-31T00:00:00Z/2024-06-30T23:59:59Z",
                "limit": 1,
                "sortby": [
                    {"field": "properties.eo:cloud_cover", "direction": "asc"},
                    {"field": "properties.datetime", "direction": "desc"}
                ],
                "query": {"eo:cloud_cover": {"lt": 20}}
            })
        );
    }

    #[test]
    fn test_feature_from_item() {
        let item: StacItem = serde_json::from_value(json!({
            "type": "Feature",
            "id": "S2B_10TET_20240612_0_L2A",
            "bbox": [-123.0, 47.0, -121.5, 48.0],
            "properties": {"datetime": "2024-06-12T19:19:59.024000Z", "eo:cloud_cover": 3.2},
            "assets": {
                "visual": {"href": "https://example.com/TCI.tif", "type": "image/tiff"},
                "thumbnail": {"href": "https://example.com/thumb.jpg"}
            }
        }))
        .unwrap();

        let feature = SceneFeature::try_from(item).unwrap();
        assert_eq!(feature.asset_href.as_deref(), Some("https://example.com/TCI.tif"));
        assert_eq!(feature.bounding_box, [-123.0, 47.0, -121.5, 48.0]);
        assert_eq!(feature.acquired_at, "2024-06-12T19:19:59.024000Z");
        assert_eq!(feature.cloud_cover, Some(3.2));
    }

    #[test]
    fn test_feature_without_visual_asset() {
        let item: StacItem = serde_json::from_value(json!({
            "id": "x",
            "bbox": [0.0, 0.0, 0.0, 1.0, 1.0, 0.0],
            "properties": {"datetime": "2024-06-12T00:00:00Z"},
            "assets": {"B04": {"href": "https://example.com/B04.tif"}}
        }))
        .unwrap();

        let feature = SceneFeature::try_from(item).unwrap();
        assert!(feature.asset_href.is_none());
        assert_eq!(feature.bounding_box, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_feature_requires_bbox_and_datetime() {
        let no_bbox: StacItem = serde_json::from_value(json!({
            "id": "a", "properties": {"datetime": "2024-06-12T00:00:00Z"}
        }))
        .unwrap();
        assert!(matches!(SceneFeature::try_from(no_bbox), Err(CatalogError::Schema(_))));

        let no_datetime: StacItem = serde_json::from_value(json!({
            "id": "b", "bbox": [0.0, 0.0, 1.0, 1.0], "properties": {}
        }))
        .unwrap();
        assert!(matches!(SceneFeature::try_from(no_datetime), Err(CatalogError::Schema(_))));
    }
}
