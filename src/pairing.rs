//! Two-date pairing: resolve one scene per date and describe each as a
//! tileable image layer.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::geometry::GeoPoint;
use crate::resolver::{CatalogResolver, ResolveOutcome};
use crate::stac::{CatalogSearch, SceneFeature, VISUAL_ASSET};

/// Raw query parameters of a change-detection request, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeDetectionParams {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub date1: Option<String>,
    pub date2: Option<String>,
    #[serde(rename = "cloudCover")]
    pub cloud_cover: Option<String>,
}

/// A change-detection request whose parameters have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingRequest {
    pub point: GeoPoint,
    pub date1: String,
    pub date2: String,
    pub cloud_cover_ceiling: u8,
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn invalid_date(ordinal: u8, date: &str) -> ServiceError {
    ServiceError::InvalidInput(format!(
        "Invalid date format for Date {ordinal} ({date}). Expected YYYY-MM-DD."
    ))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ChangeDetectionParams {
    /// Check presence, formats and ranges. Nothing here touches the network.
    pub fn validate(&self, default_cloud_cover: u8) -> Result<PairingRequest> {
        let (Some(lat), Some(lon), Some(date1), Some(date2)) = (
            present(&self.lat),
            present(&self.lon),
            present(&self.date1),
            present(&self.date2),
        ) else {
            return Err(ServiceError::InvalidInput("Missing required query parameters".to_string()));
        };

        let invalid_coordinates = || ServiceError::InvalidInput("Invalid coordinates".to_string());
        let lat: f64 = lat.parse().map_err(|_| invalid_coordinates())?;
        let lon: f64 = lon.parse().map_err(|_| invalid_coordinates())?;
        let point = GeoPoint::new(lat, lon).map_err(|_| invalid_coordinates())?;

        for (ordinal, date) in [(1, date1), (2, date2)] {
            if NaiveDate::parse_from_str(date, DATE_FORMAT).is_err() {
                return Err(invalid_date(ordinal, date));
            }
        }

        let cloud_cover_ceiling = match present(&self.cloud_cover) {
            None => default_cloud_cover,
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| ServiceError::InvalidInput("Invalid cloud cover value".to_string()))?;
                u8::try_from(value).ok().filter(|v| (1..=100).contains(v)).ok_or_else(|| {
                    ServiceError::InvalidInput("Cloud cover must be a number between 1 and 100".to_string())
                })?
            }
        };

        Ok(PairingRequest {
            point,
            date1: date1.to_string(),
            date2: date2.to_string(),
            cloud_cover_ceiling,
        })
    }
}

/// One side of the pair, as consumed by a slippy-map client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedImageInfo {
    /// Tile endpoint URL with literal `{z}/{x}/{y}` placeholders
    pub tile_url_template: String,
    /// `[[south, west], [north, east]]`
    pub bounds: [[f64; 2]; 2],
    pub date_acquired: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetectionResponse {
    pub image1: PairedImageInfo,
    pub image2: PairedImageInfo,
}

/// `<base>/api/tiles/{z}/{x}/{y}?url=<form-urlencoded href>`
#[must_use]
pub fn tile_url_template(public_base_url: &str, href: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", href)
        .finish();
    format!(
        "{}/api/tiles/{{z}}/{{x}}/{{y}}?{query}",
        public_base_url.trim_end_matches('/')
    )
}

/// `[west, south, east, north]` to `[[south, west], [north, east]]`
#[must_use]
pub fn leaflet_bounds(bbox: [f64; 4]) -> [[f64; 2]; 2] {
    let [west, south, east, north] = bbox;
    [[south, west], [north, east]]
}

/// Combines two resolver calls into one paired response.
#[derive(Clone)]
pub struct PairingOrchestrator {
    resolver: CatalogResolver,
    public_base_url: String,
    window_radius_days: u32,
}

impl PairingOrchestrator {
    pub fn new(catalog: Arc<dyn CatalogSearch>, config: &ServiceConfig) -> Self {
        Self {
            resolver: CatalogResolver::new(catalog, config.collection.clone()),
            public_base_url: config.public_base_url.clone(),
            window_radius_days: config.window_radius_days,
        }
    }

    /// Resolve both dates concurrently and build the paired response.
    ///
    /// Date 1 is reported before date 2 when both fail. No tile URL is built
    /// unless both dates resolved to a scene.
    pub async fn paired_change_detection(&self, request: &PairingRequest) -> Result<ChangeDetectionResponse> {
        let ceiling = request.cloud_cover_ceiling;
        let (first, second) = join(
            self.resolver
                .resolve(request.point, &request.date1, ceiling, self.window_radius_days),
            self.resolver
                .resolve(request.point, &request.date2, ceiling, self.window_radius_days),
        )
        .await;

        let feature1 = require_scene(first, 1, &request.date1, ceiling)?;
        let feature2 = require_scene(second, 2, &request.date2, ceiling)?;

        let image1 = self.image_info(feature1, 1)?;
        let image2 = self.image_info(feature2, 2)?;

        info!(
            lat = request.point.lat(),
            lon = request.point.lon(),
            date1 = %image1.date_acquired,
            date2 = %image2.date_acquired,
            "Paired scenes"
        );
        Ok(ChangeDetectionResponse { image1, image2 })
    }

    fn image_info(&self, feature: SceneFeature, ordinal: u8) -> Result<PairedImageInfo> {
        let Some(href) = feature.asset_href.as_deref().filter(|h| !h.is_empty()) else {
            warn!(id = %feature.id, "Scene has no '{VISUAL_ASSET}' asset");
            return Err(ServiceError::MissingAsset(format!(
                "No '{VISUAL_ASSET}' asset URL found for Date {ordinal}."
            )));
        };

        Ok(PairedImageInfo {
            tile_url_template: tile_url_template(&self.public_base_url, href),
            bounds: leaflet_bounds(feature.bounding_box),
            date_acquired: feature.acquired_at,
        })
    }
}

fn require_scene(outcome: ResolveOutcome, ordinal: u8, date: &str, ceiling: u8) -> Result<SceneFeature> {
    match outcome {
        ResolveOutcome::Found(feature) => Ok(feature),
        ResolveOutcome::NotFound => Err(ServiceError::NotFound(format!(
            "No clear image found for Date {ordinal} ({date}) with cloud cover less than {ceiling}%."
        ))),
        ResolveOutcome::InvalidDate => Err(invalid_date(ordinal, date)),
        ResolveOutcome::UpstreamFailure => Err(ServiceError::UpstreamFailure(format!(
            "Failed to query the satellite catalog for Date {ordinal}."
        ))),
    }
}
