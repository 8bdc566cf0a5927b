//! Skywell AppView server library logic.

pub mod api;
pub mod api_admin;
pub mod auth;
pub mod config;
pub mod jetstream;
pub mod middleware;

use auth::AuthGate;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Extension, Router,
};
use middleware::RateLimiter;
use skywell_index::{RecordIndexer, ViewMaterializer};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Write side, used by the re-index endpoint.
    pub indexer: RecordIndexer,
    /// Read side for the query endpoints.
    pub views: ViewMaterializer,
    /// Validates service-auth bearer tokens.
    pub auth: Arc<dyn AuthGate>,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Requests allowed per client IP per minute. Zero disables limiting.
    pub rate_limit: u32,
}

/// Maximum request body size. Only the admin endpoint takes a body.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route(
            "/xrpc/dev.skywell.getActorProfile",
            get(api::get_actor_profile_handler),
        )
        .route(
            "/xrpc/dev.skywell.getFileFromSlug",
            get(api::get_file_from_slug_handler),
        )
        .route(
            "/xrpc/dev.skywell.getActorFiles",
            get(api::get_actor_files_handler),
        )
        .route(
            "/xrpc/dev.skywell.indexActorProfile",
            post(api_admin::index_actor_profile_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(Extension(Arc::new(state)))
}
