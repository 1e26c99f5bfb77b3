//! Catalog feature resolver: best scene over a point near a date.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info};

use crate::geometry::GeoPoint;
use crate::stac::{CatalogSearch, DateWindow, SceneFeature, SceneQuery};

/// Result of a single resolve. Catalog and parse failures are outcomes here,
/// not errors; callers decide how to report them.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Found(SceneFeature),
    NotFound,
    InvalidDate,
    UpstreamFailure,
}

/// Resolves one date to one scene through a [`CatalogSearch`] backend.
#[derive(Clone)]
pub struct CatalogResolver {
    catalog: Arc<dyn CatalogSearch>,
    collection: String,
}

impl CatalogResolver {
    pub fn new(catalog: Arc<dyn CatalogSearch>, collection: impl Into<String>) -> Self {
        Self {
            catalog,
            collection: collection.into(),
        }
    }

    /// Find the least cloudy (then most recent) scene covering `point` within
    /// `window_radius_days` of `date_str` (`YYYY-MM-DD`) and with cloud cover
    /// strictly below `cloud_cover_ceiling`.
    ///
    /// Every call queries the catalog; nothing is cached.
    pub async fn resolve(
        &self,
        point: GeoPoint,
        date_str: &str,
        cloud_cover_ceiling: u8,
        window_radius_days: u32,
    ) -> ResolveOutcome {
        let target = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            Ok(date) => date,
            Err(e) => {
                error!(date = date_str, error = %e, "Invalid date format, expected YYYY-MM-DD");
                return ResolveOutcome::InvalidDate;
            }
        };

        let window = DateWindow::around(target, window_radius_days);
        let query = SceneQuery::new(point, window, cloud_cover_ceiling, self.collection.clone());

        match self.catalog.search(&query).await {
            Ok(features) => match features.into_iter().next() {
                Some(feature) => {
                    info!(
                        id = %feature.id,
                        date = date_str,
                        cloud_cover = ?feature.cloud_cover,
                        "Resolved scene"
                    );
                    ResolveOutcome::Found(feature)
                }
                None => {
                    info!(date = date_str, window = %window, ceiling = cloud_cover_ceiling, "No scene found");
                    ResolveOutcome::NotFound
                }
            },
            Err(e) => {
                error!(date = date_str, error = %e, "Catalog search failed");
                ResolveOutcome::UpstreamFailure
            }
        }
    }
}
