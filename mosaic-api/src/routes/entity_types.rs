//! Entity Type REST API Routes
//!
//! `:key` is either the type's UUID or its (normalizable) name. A type scoped
//! to an application the caller cannot see is reported as not found.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use mosaic_core::{ApplicationId, EntityType, EntityTypePatch, NewEntityType, Tenancy};
use mosaic_storage::EntityService;

use crate::{
    error::{ApiError, ApiResult},
    extractors::RequestContext,
    state::AppState,
    types::{check_own_application, parse_application_param, ListTypesParams, ListTypesResponse},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/types - Global types plus those of the caller's application
pub async fn list_types(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Query(params): Query<ListTypesParams>,
) -> ApiResult<impl IntoResponse> {
    let viewer = service.resolve_application(ctx.application_id);
    let application_id = match parse_application_param(params.application_id.as_deref())? {
        Some(Tenancy::Global) => None,
        Some(Tenancy::Scoped(id)) => {
            check_own_application(viewer, Some(id))?;
            Some(id)
        }
        None => viewer,
    };

    let types = service.list_types(application_id).await?;
    let total = types.len();
    Ok(Json(ListTypesResponse { types, total }))
}

/// POST /api/v1/types - Register a new entity type
pub async fn create_type(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Json(req): Json<NewEntityType>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::missing_field("name"));
    }
    check_own_application(
        service.resolve_application(ctx.application_id),
        req.tenancy.application_id(),
    )?;

    let entity_type = service.create_type(req).await?;
    Ok((StatusCode::CREATED, Json(entity_type)))
}

/// GET /api/v1/types/:key - Get a type by id or name
pub async fn get_type(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let entity_type = resolve(&service, &key, service.resolve_application(ctx.application_id)).await?;
    Ok(Json(entity_type))
}

/// PUT /api/v1/types/:key - Update display metadata or replace the schema
pub async fn update_type(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(key): Path<String>,
    Json(patch): Json<EntityTypePatch>,
) -> ApiResult<impl IntoResponse> {
    let existing = resolve(&service, &key, service.resolve_application(ctx.application_id)).await?;
    let updated = service
        .update_type(existing.id, patch)
        .await?
        .ok_or_else(|| ApiError::type_not_found(&key))?;
    Ok(Json(updated))
}

/// DELETE /api/v1/types/:key - Delete a non-system type
///
/// Entities of the type are left in place.
pub async fn delete_type(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let existing = resolve(&service, &key, service.resolve_application(ctx.application_id)).await?;
    if existing.is_system {
        return Err(ApiError::invalid_input(format!(
            "Entity type '{}' is a system type and cannot be deleted",
            existing.name
        ))
        .with_details(serde_json::json!({ "type": existing.name })));
    }

    if service.delete_type(existing.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::type_not_found(&key))
    }
}

async fn resolve(service: &EntityService, key: &str, viewer: Option<ApplicationId>) -> ApiResult<EntityType> {
    service
        .resolve_type(key)
        .await?
        .filter(|ty| ty.tenancy.visible_to(viewer))
        .ok_or_else(|| ApiError::type_not_found(key))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_types).post(create_type))
        .route("/:key", get(get_type).put(update_type).delete(delete_type))
}
