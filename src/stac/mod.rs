//! STAC catalog access: search models, the HTTP client, and the
//! [`CatalogSearch`] seam the resolver is written against.

pub mod client;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::StacClient;
pub use models::{DateWindow, SceneFeature, SceneQuery, StacSearchBody, VISUAL_ASSET};

/// Failures talking to the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Connection failure, timeout, or unreadable body
    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body is not a STAC item collection
    #[error("unexpected catalog response: {0}")]
    Schema(String),
}

/// Item search against a STAC catalog.
///
/// Implementations must be `Send + Sync`; the service shares one instance
/// across all requests.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Run `query` and return matching scenes in catalog order.
    async fn search(&self, query: &SceneQuery) -> Result<Vec<SceneFeature>, CatalogError>;
}
