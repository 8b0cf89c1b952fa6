//! REST API Routes
//!
//! Route modules for each resource plus the top-level router:
//! - `/api/v1/types` - Type Registry
//! - `/api/v1/entities` - Entity Store and Query Engine
//! - `/api/v1/relations` - Relation Graph
//! - `/api/v1/maintenance` - Consistency sweep
//! - `/health` - Probes

pub mod entities;
pub mod entity_types;
pub mod health;
pub mod maintenance;
pub mod relations;

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    Router,
};
use mosaic_storage::EntityService;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ApiConfig;
use crate::extractors::{APPLICATION_HEADER, PRINCIPAL_HEADER};
use crate::state::AppState;
use crate::telemetry::observability_middleware;

/// Build the complete application router.
pub fn create_api_router(service: EntityService, api_config: &ApiConfig) -> Router {
    let state = AppState::new(service, api_config.clone());

    let api_routes = Router::new()
        .nest("/types", entity_types::create_router())
        .nest("/entities", entities::create_router())
        .nest("/relations", relations::create_router())
        .nest("/maintenance", maintenance::create_router());

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(api_config))
        .with_state(state)
}

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins, including
/// `*.domain` wildcards.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(APPLICATION_HEADER),
            HeaderName::from_static(PRINCIPAL_HEADER),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let config = config.clone();
        cors.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| config.is_origin_allowed(o))
                .unwrap_or(false)
        }))
    }
}
