//! Maintenance Routes
//!
//! Referential consistency is not enforced on write, so dangling edges are
//! cleaned up here on demand.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use mosaic_storage::EntityService;

use crate::{error::ApiResult, state::AppState, types::SweepParams};

/// POST /api/v1/maintenance/sweep?dryRun=true|false
pub async fn sweep(
    State(service): State<EntityService>,
    Query(params): Query<SweepParams>,
) -> ApiResult<impl IntoResponse> {
    let report = service.sweep(params.dry_run.unwrap_or(true)).await?;
    Ok(Json(report))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/sweep", post(sweep))
}
