//! Relation REST API Routes
//!
//! Edges have no id of their own; every endpoint addresses one by its
//! `(sourceId, targetId, relationType)` key. An endpoint entity the caller
//! cannot see is reported as not found, so edges never cross tenants.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use mosaic_core::EntityId;
use mosaic_storage::EntityService;

use crate::{
    error::{ApiError, ApiResult},
    extractors::RequestContext,
    routes::entities::ensure_visible,
    state::AppState,
    types::{CreateRelationRequest, ExistsResponse, RelationKeyParams},
};

/// POST /api/v1/relations - Create an edge or merge metadata into it
pub async fn create_relation(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Json(req): Json<CreateRelationRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_endpoints_visible(&service, &ctx, req.source_id, req.target_id).await?;
    let relation = service
        .create_relation(req.source_id, req.target_id, &req.relation_type, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(relation)))
}

/// GET /api/v1/relations - Fetch one edge
pub async fn get_relation(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Query(key): Query<RelationKeyParams>,
) -> ApiResult<impl IntoResponse> {
    ensure_endpoints_visible(&service, &ctx, key.source_id, key.target_id).await?;
    let relation = service
        .get_relation(key.source_id, key.target_id, &key.relation_type)
        .await?
        .ok_or_else(ApiError::relation_not_found)?;
    Ok(Json(relation))
}

/// DELETE /api/v1/relations - Remove one edge
pub async fn delete_relation(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Query(key): Query<RelationKeyParams>,
) -> ApiResult<impl IntoResponse> {
    ensure_endpoints_visible(&service, &ctx, key.source_id, key.target_id).await?;
    if service
        .delete_relation(key.source_id, key.target_id, &key.relation_type)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::relation_not_found())
    }
}

/// GET /api/v1/relations/exists
pub async fn relation_exists(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Query(key): Query<RelationKeyParams>,
) -> ApiResult<impl IntoResponse> {
    ensure_endpoints_visible(&service, &ctx, key.source_id, key.target_id).await?;
    let exists = service
        .has_relation(key.source_id, key.target_id, &key.relation_type)
        .await?;
    Ok(Json(ExistsResponse { exists }))
}

async fn ensure_endpoints_visible(
    service: &EntityService,
    ctx: &RequestContext,
    source_id: EntityId,
    target_id: EntityId,
) -> ApiResult<()> {
    let viewer = service.resolve_application(ctx.application_id);
    ensure_visible(service, viewer, source_id).await?;
    ensure_visible(service, viewer, target_id).await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_relation).post(create_relation).delete(delete_relation))
        .route("/exists", get(relation_exists))
}
