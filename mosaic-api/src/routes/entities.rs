//! Entity REST API Routes
//!
//! Entities are addressed under their type name. A record of another type,
//! or one scoped to an application the caller cannot see, is reported as
//! not found.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use mosaic_core::{
    normalize_type_name, ApplicationId, AttrValue, Entity, EntityId, EntityPatch, EntityQuery,
    OrderDir, RelationDirection, RelationJoin, SearchOptions, Status, TenantScope,
};
use mosaic_storage::EntityService;

use crate::{
    error::{ApiError, ApiResult},
    extractors::{EntityPath, RequestContext},
    state::AppState,
    types::{
        parse_application_param, request_scope, CreateEntityRequest, DeleteEntityParams,
        MembersParams, RelatedParams, SearchParams, SearchResponse,
    },
};

/// Prefix of attribute filter parameters, e.g. `filter.body=hi`.
pub const FILTER_PREFIX: &str = "filter.";

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Build an [`EntityQuery`] from raw query pairs.
///
/// `viewer` is the caller's resolved application. The query sees global
/// records plus the viewer's; `applicationId` may narrow that to `global` or
/// to the viewer's own application. Unknown parameters are ignored. Filter values are parsed loosely, so `filter.rank=3` matches the
/// number 3 and `filter.body=hi` the string "hi".
pub fn entity_query_from_params(
    params: &[(String, String)],
    viewer: Option<ApplicationId>,
) -> ApiResult<EntityQuery> {
    let mut query = EntityQuery::new();
    let mut explicit_application = None;
    let mut related_to = None;
    let mut relation_type = None;
    let mut direction = RelationDirection::default();

    for (key, value) in params {
        match key.as_str() {
            "applicationId" => explicit_application = parse_application_param(Some(value))?,
            "ownerId" => {
                query.owner_id = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ApiError::invalid_format("ownerId", "principal UUID"))?,
                )
            }
            "status" if !value.trim().is_empty() => query.status = Some(Status::new(value.trim())),
            "page" => query.page = parse_number("page", value)?,
            "limit" => query.limit = parse_number("limit", value)?,
            "orderBy" => query.order_by = Some(value.clone()).filter(|v| !v.trim().is_empty()),
            "orderDir" => query.order_dir = Some(value.parse::<OrderDir>()?),
            "search" => query.search = Some(value.clone()).filter(|v| !v.is_empty()),
            "relatedTo" => {
                related_to = Some(
                    value
                        .trim()
                        .parse::<EntityId>()
                        .map_err(|_| ApiError::invalid_format("relatedTo", "entity UUID"))?,
                )
            }
            "relationType" => relation_type = Some(value.trim().to_string()),
            "direction" => {
                direction = match value.trim().to_ascii_lowercase().as_str() {
                    "outgoing" => RelationDirection::Outgoing,
                    "incoming" => RelationDirection::Incoming,
                    _ => return Err(ApiError::invalid_format("direction", "'outgoing' or 'incoming'")),
                }
            }
            other => {
                if let Some(field) = other.strip_prefix(FILTER_PREFIX) {
                    query.filters.insert(field.to_string(), AttrValue::parse_loose(value));
                }
            }
        }
    }

    query.scope = request_scope(viewer, explicit_application)?;

    match (related_to, relation_type) {
        (Some(entity_id), Some(relation_type)) => {
            query.related = Some(RelationJoin {
                entity_id,
                relation_type,
                direction,
            })
        }
        (Some(_), None) => return Err(ApiError::missing_field("relationType")),
        (None, Some(_)) => return Err(ApiError::missing_field("relatedTo")),
        (None, None) => {}
    }

    Ok(query)
}

fn parse_number(field: &str, raw: &str) -> ApiResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ApiError::invalid_format(field, "non-negative integer"))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/entities/:typeName - Paginated, filtered query
pub async fn query_entities(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(type_name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let viewer = service.resolve_application(ctx.application_id);
    let query = entity_query_from_params(&params, viewer)?;
    if let Some(join) = &query.related {
        ensure_visible(&service, viewer, join.entity_id).await?;
    }
    let page = service.query(&type_name, query).await?;
    Ok(Json(page))
}

/// GET /api/v1/entities/:typeName/search - Typeahead search, newest first
pub async fn search_entities(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(type_name): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<impl IntoResponse> {
    let scope = request_scope(
        service.resolve_application(ctx.application_id),
        parse_application_param(params.application_id.as_deref())?,
    )?;
    let text = params.q.unwrap_or_default();

    let entities = service
        .search(
            &type_name,
            &text,
            SearchOptions {
                scope,
                limit: params.limit,
            },
        )
        .await?;
    let count = entities.len();
    Ok(Json(SearchResponse { entities, count }))
}

/// POST /api/v1/entities/:typeName - Create an entity
pub async fn create_entity(
    State(service): State<EntityService>,
    ctx: RequestContext,
    Path(type_name): Path<String>,
    Json(req): Json<CreateEntityRequest>,
) -> ApiResult<impl IntoResponse> {
    let input = req.into_new_entity(service.resolve_application(ctx.application_id), ctx.principal_id)?;
    let entity = service.create_entity(&type_name, input).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

/// GET /api/v1/entities/:typeName/:id - Get an entity
pub async fn get_entity(
    State(service): State<EntityService>,
    ctx: RequestContext,
    path: EntityPath,
) -> ApiResult<impl IntoResponse> {
    let entity = load_visible(&service, &ctx, &path).await?;
    Ok(Json(entity))
}

/// PUT /api/v1/entities/:typeName/:id - Merge attributes/metadata, replace status
pub async fn update_entity(
    State(service): State<EntityService>,
    ctx: RequestContext,
    path: EntityPath,
    Json(patch): Json<EntityPatch>,
) -> ApiResult<impl IntoResponse> {
    let entity = load_visible(&service, &ctx, &path).await?;
    let updated = service
        .update_entity(entity.id, patch)
        .await?
        .ok_or_else(|| ApiError::entity_not_found(&entity.type_name, entity.id))?;
    Ok(Json(updated))
}

/// DELETE /api/v1/entities/:typeName/:id?hard=true|false
pub async fn delete_entity(
    State(service): State<EntityService>,
    ctx: RequestContext,
    path: EntityPath,
    Query(params): Query<DeleteEntityParams>,
) -> ApiResult<impl IntoResponse> {
    let entity = load_visible(&service, &ctx, &path).await?;
    if service.delete_entity(entity.id, params.hard).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::entity_not_found(&entity.type_name, entity.id))
    }
}

/// GET /api/v1/entities/:typeName/:id/related - Outgoing traversal
pub async fn related_entities(
    State(service): State<EntityService>,
    ctx: RequestContext,
    path: EntityPath,
    Query(params): Query<RelatedParams>,
) -> ApiResult<impl IntoResponse> {
    let relation_type = required_relation_type(params.relation_type)?;
    let anchor = load_visible(&service, &ctx, &path).await?;
    let scope = TenantScope::VisibleTo(service.resolve_application(ctx.application_id));

    let entities: Vec<Entity> = service
        .related_from(anchor.id, &relation_type, params.target_type.as_deref(), scope)
        .await?;
    Ok(Json(entities))
}

/// GET /api/v1/entities/:typeName/:id/members - Incoming traversal in join order
pub async fn member_entities(
    State(service): State<EntityService>,
    ctx: RequestContext,
    path: EntityPath,
    Query(params): Query<MembersParams>,
) -> ApiResult<impl IntoResponse> {
    let relation_type = required_relation_type(params.relation_type)?;
    let anchor = load_visible(&service, &ctx, &path).await?;

    let scope = TenantScope::VisibleTo(service.resolve_application(ctx.application_id));

    let members = service.related_to(anchor.id, &relation_type, scope).await?;
    Ok(Json(members))
}

fn required_relation_type(raw: Option<String>) -> ApiResult<String> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("relationType"))
}

/// Fetch the addressed entity if it has the path's type and the caller can see it.
async fn load_visible(service: &EntityService, ctx: &RequestContext, path: &EntityPath) -> ApiResult<Entity> {
    let type_name = normalize_type_name(&path.type_name)?;
    let viewer = service.resolve_application(ctx.application_id);

    match service.get_entity(path.id).await? {
        Some(entity) if entity.type_name == type_name && entity.tenancy.visible_to(viewer) => Ok(entity),
        _ => Err(ApiError::entity_not_found(&type_name, path.id)),
    }
}

/// Fail with not-found when `id` names an entity the viewer cannot see.
///
/// An id that names no entity at all passes.
pub(crate) async fn ensure_visible(
    service: &EntityService,
    viewer: Option<ApplicationId>,
    id: EntityId,
) -> ApiResult<()> {
    match service.get_entity(id).await? {
        Some(entity) if !entity.tenancy.visible_to(viewer) => Err(ApiError::entity_not_found("Entity", id)),
        _ => Ok(()),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:type_name", get(query_entities).post(create_entity))
        .route("/:type_name/search", get(search_entities))
        .route(
            "/:type_name/:id",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route("/:type_name/:id/related", get(related_entities))
        .route("/:type_name/:id/members", get(member_entities))
}
