//! geochange HTTP server
//!
//! Serves the change-detection pairing endpoint and the XYZ tile endpoint.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=geochange=debug PORT=8080 cargo run --bin geochange-server
//! ```
//!
//! See [`geochange::ServiceConfig::from_env`] for the environment variables.
//! `RUST_LOG` sets the log filter (default: info).

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use geochange::http::{AppState, create_router};
use geochange::{ServiceConfig, StacClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        catalog = %config.stac_api_url,
        collection = %config.collection,
        public_base_url = %config.public_base_url,
        "Starting geochange server"
    );
    if config.allow_local_sources {
        info!("Local filesystem tile sources enabled");
    }

    let catalog = StacClient::new(config.stac_api_url.clone(), config.catalog_timeout)?;
    let addr = config.bind_address();
    let app = create_router(AppState::new(config, Arc::new(catalog)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
