//! Mosaic API Server Entry Point
//!
//! Loads configuration, optionally migrates the database, and starts the
//! Axum HTTP server.

use std::sync::Arc;

use axum::Router;
use mosaic_api::{
    create_api_router, init_tracing, run_migrations, ApiConfig, ApiError, ApiResult, DbClient,
    DbConfig,
};
use mosaic_storage::EntityService;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let api_config = ApiConfig::from_env()?;
    init_tracing(api_config.log_format)?;

    let store_config = api_config.store_config()?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;

    if api_config.run_migrations {
        let applied = run_migrations(&db).await?;
        tracing::info!(count = applied.len(), "Migrations applied");
    }

    let service = EntityService::new(Arc::new(db), store_config);
    let app: Router = create_api_router(service, &api_config);

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting Mosaic API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
