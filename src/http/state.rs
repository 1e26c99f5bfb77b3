//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::pairing::PairingOrchestrator;
use crate::range_reader::SourceOptions;
use crate::stac::CatalogSearch;

/// Shared, read-only state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub orchestrator: PairingOrchestrator,
}

impl AppState {
    pub fn new(config: ServiceConfig, catalog: Arc<dyn CatalogSearch>) -> Self {
        let orchestrator = PairingOrchestrator::new(catalog, &config);
        Self {
            config: Arc::new(config),
            orchestrator,
        }
    }

    /// Options for opening tile source rasters
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            timeout: self.config.raster_timeout,
            allow_local: self.config.allow_local_sources,
        }
    }
}
