//! HTTP surface of the service.
//!
//! Thin axum handlers over the pairing orchestrator and the tile extractor.
//! Handlers parse and validate the request, delegate, and map
//! [`ServiceError`](crate::error::ServiceError) kinds onto status codes.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::{JsonError, TileResponseError};
pub use router::create_router;
pub use state::AppState;
