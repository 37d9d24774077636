//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header, Method, StatusCode},
    routing::get,
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::error::ApiError;
use crate::handlers::{
    add_objects, delete_object, get_api_root, get_collection, get_collections, get_discovery,
    get_manifest, get_object, get_object_versions, get_objects, get_status, health, ready,
    AppState,
};
use crate::openapi::ApiDoc;

/// Create the application router with default config (for testing)
pub fn create_router(state: AppState) -> Router {
    create_router_with_config(state, &Config::default())
}

/// Create the application router with custom configuration
pub fn create_router_with_config(state: AppState, config: &Config) -> Router {
    // Configure CORS based on allowed_origins
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_mb * 1024 * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    // Base router with common layers
    let router = Router::new()
        .route("/taxii2/", get(get_discovery))
        .route("/{api_root}/", get(get_api_root))
        .route("/{api_root}/status/{status_id}/", get(get_status))
        .route("/{api_root}/collections/", get(get_collections))
        .route("/{api_root}/collections/{collection_id}/", get(get_collection))
        .route(
            "/{api_root}/collections/{collection_id}/objects/",
            get(get_objects).post(add_objects),
        )
        .route(
            "/{api_root}/collections/{collection_id}/objects/{object_id}/",
            get(get_object).delete(delete_object),
        )
        .route(
            "/{api_root}/collections/{collection_id}/objects/{object_id}/versions/",
            get(get_object_versions),
        )
        .route(
            "/{api_root}/collections/{collection_id}/manifest/",
            get(get_manifest),
        )
        .route("/health", get(health))
        .route("/ready", get(ready))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    if config.rate_limit_enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish()
            .expect("Failed to build rate limiter config");

        tracing::info!(
            "Rate limiting: {} req/s (burst: {})",
            config.rate_limit_per_sec,
            config.rate_limit_burst
        );

        router
            .layer(GovernorLayer::new(Arc::new(governor_conf)))
            .layer(TraceLayer::new_for_http())
    } else {
        tracing::warn!("Rate limiting: DISABLED");
        router.layer(TraceLayer::new_for_http())
    }
}

/// Unrouted paths still answer with a TAXII error resource.
async fn not_found() -> ApiError {
    ApiError::not_found("the requested URL")
}
