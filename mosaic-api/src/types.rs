//! Request and response bodies of the REST API.
//!
//! Store records (`EntityType`, `Entity`, `EntityRelation`, `Page`) are
//! serialized as-is; the types here cover inputs and list envelopes.

use mosaic_core::{
    ApplicationId, Attributes, Entity, EntityId, EntityType, NewEntity, PrincipalId, Status, Tenancy,
    TenantScope,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Query value selecting global records instead of an application.
pub const GLOBAL_APPLICATION: &str = "global";

/// Parse an `applicationId` query value: a UUID, `global`, or blank.
pub fn parse_application_param(raw: Option<&str>) -> ApiResult<Option<Tenancy>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if raw.eq_ignore_ascii_case(GLOBAL_APPLICATION) {
        return Ok(Some(Tenancy::Global));
    }
    raw.parse::<ApplicationId>()
        .map(|id| Some(Tenancy::Scoped(id)))
        .map_err(|_| ApiError::invalid_format("applicationId", "application UUID or 'global'"))
}

/// Tenant scope of a list or search request made by `viewer`.
///
/// Without a parameter the caller sees global records plus its own. The
/// parameter can only narrow that view, to `global` or to the caller's own
/// application.
pub fn request_scope(viewer: Option<ApplicationId>, requested: Option<Tenancy>) -> ApiResult<TenantScope> {
    match requested {
        None => Ok(TenantScope::VisibleTo(viewer)),
        Some(Tenancy::Global) => Ok(TenantScope::Only(Tenancy::Global)),
        Some(Tenancy::Scoped(app)) => {
            check_own_application(viewer, Some(app))?;
            Ok(TenantScope::Only(Tenancy::Scoped(app)))
        }
    }
}

/// Refuse an explicit application that is not the caller's.
pub fn check_own_application(viewer: Option<ApplicationId>, requested: Option<ApplicationId>) -> ApiResult<()> {
    match requested {
        Some(app) if viewer != Some(app) => Err(ApiError::foreign_application(app)),
        _ => Ok(()),
    }
}

// ============================================================================
// ENTITY TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTypesParams {
    pub application_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTypesResponse {
    pub types: Vec<EntityType>,
    pub total: usize,
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Body of `POST /entities/:typeName`.
///
/// A missing `applicationId` falls back to the caller's application and a
/// missing `ownerId` to the calling principal. An explicit `applicationId`
/// must be the caller's own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityRequest {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    #[serde(default)]
    pub owner_id: Option<PrincipalId>,
    #[serde(default)]
    pub status: Option<Status>,
}

impl CreateEntityRequest {
    pub fn into_new_entity(
        self,
        application_id: Option<ApplicationId>,
        owner_id: Option<PrincipalId>,
    ) -> ApiResult<NewEntity> {
        check_own_application(application_id, self.application_id)?;
        Ok(NewEntity {
            attributes: self.attributes,
            metadata: self.metadata,
            tenancy: Tenancy::from_option(self.application_id.or(application_id)),
            owner_id: self.owner_id.or(owner_id),
            status: self.status,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteEntityParams {
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub application_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub entities: Vec<Entity>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedParams {
    pub relation_type: Option<String>,
    pub target_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersParams {
    pub relation_type: Option<String>,
}

// ============================================================================
// RELATIONS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationRequest {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: String,
    #[serde(default)]
    pub metadata: Attributes,
}

/// The composite key of an edge, as query parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationKeyParams {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

// ============================================================================
// MAINTENANCE
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepParams {
    /// Defaults to a dry run; orphans are only removed when `false`.
    pub dry_run: Option<bool>,
}
