//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use mosaic_storage::EntityService;

use crate::config::ApiConfig;

/// Application-wide state shared across all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Store facade; backed by Postgres in production, memory in tests.
    pub service: EntityService,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: EntityService, config: ApiConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(EntityService, service);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Instant, start_time);
