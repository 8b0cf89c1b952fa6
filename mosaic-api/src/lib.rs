//! Mosaic API - PostgreSQL Backend and REST Surface
//!
//! This crate puts the entity/relation store on the network: a PostgreSQL
//! implementation of the storage traits, versioned SQL migrations, and an
//! Axum router exposing the Type Registry, Entity Store, Relation Graph and
//! Query Engine over JSON.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod macros;
pub mod migrations;
pub mod routes;
pub mod sql;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, LogFormat};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{EntityPath, RequestContext, APPLICATION_HEADER, PRINCIPAL_HEADER};
pub use migrations::run_migrations;
pub use routes::create_api_router;
pub use state::AppState;
pub use telemetry::{init_tracing, observability_middleware};
