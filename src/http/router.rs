//! Router configuration for the HTTP API.

use axum::{Router, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Browser map clients are served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/tiles/{z}/{x}/{y}", get(handlers::get_tile))
        .route("/change-detection", get(handlers::change_detection));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
