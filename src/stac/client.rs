//! Async STAC item-search client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::models::{SceneFeature, SceneQuery, StacItemCollection};
use super::{CatalogError, CatalogSearch};

/// Client for a single STAC `POST /search` endpoint.
///
/// One request per search, bounded by the configured timeout. No retries and
/// no pagination: the resolver only ever asks for the top result.
#[derive(Debug, Clone)]
pub struct StacClient {
    search_url: String,
    client: reqwest::Client,
}

impl StacClient {
    /// `search_url` is the full item-search URL, e.g. `https://host/v1/search`.
    pub fn new(search_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            search_url: search_url.into(),
            client,
        })
    }

    #[must_use]
    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    async fn post_search(&self, query: &SceneQuery) -> Result<StacItemCollection, CatalogError> {
        let body = query.to_search_body();
        debug!(url = %self.search_url, datetime = %body.datetime, "STAC search");

        let response = self.client.post(&self.search_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| CatalogError::Schema(format!("parsing STAC response: {e}")))
    }
}

#[async_trait]
impl CatalogSearch for StacClient {
    async fn search(&self, query: &SceneQuery) -> Result<Vec<SceneFeature>, CatalogError> {
        let collection = self.post_search(query).await?;
        // Only the best-ranked item is used; later items are not validated
        collection
            .features
            .into_iter()
            .next()
            .map(SceneFeature::try_from)
            .into_iter()
            .collect()
    }
}
