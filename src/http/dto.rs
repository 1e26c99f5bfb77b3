//! Request and response bodies that only exist at the HTTP boundary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query string of the tile endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TileQuery {
    /// Source raster URL
    pub url: Option<String>,
}

/// JSON error body: `{"error": "<message>"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
