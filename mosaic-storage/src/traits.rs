//! Backend traits.
//!
//! Each trait covers one component of the store. Backends receive records
//! that are already validated and, for queries, plans that already passed
//! the field allow-list; validation and event emission live in
//! [`crate::EntityService`].

use async_trait::async_trait;
use mosaic_core::{
    ApplicationId, Attributes, Entity, EntityId, EntityPatch, EntityRelation, EntityType,
    EntityTypeId, EntityTypePatch, MosaicResult, Page, PrincipalId, QueryPlan, RelatedEntity,
    RelationKey, TenantScope,
};
use serde::{Deserialize, Serialize};

/// Registered entity types.
#[async_trait]
pub trait TypeRegistry: Send + Sync {
    // ========================================================================
    // READS
    // ========================================================================

    /// Global types plus those scoped to `application_id`, ordered by
    /// category (uncategorized last), then display name.
    async fn list_types(&self, application_id: Option<ApplicationId>) -> MosaicResult<Vec<EntityType>>;

    /// Look up a type by its normalized name.
    async fn get_type(&self, name: &str) -> MosaicResult<Option<EntityType>>;

    async fn get_type_by_id(&self, id: EntityTypeId) -> MosaicResult<Option<EntityType>>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a new type. Fails with `DuplicateName` if the name is taken.
    async fn insert_type(&self, entity_type: &EntityType) -> MosaicResult<()>;

    /// Apply a validated patch. `None` if the id is unknown.
    async fn update_type(&self, id: EntityTypeId, patch: EntityTypePatch) -> MosaicResult<Option<EntityType>>;

    /// Remove a non-system type. Returns false for system types and unknown ids.
    async fn delete_type(&self, id: EntityTypeId) -> MosaicResult<bool>;
}

/// Entity rows.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert_entity(&self, entity: &Entity) -> MosaicResult<()>;

    async fn get_entity(&self, id: EntityId) -> MosaicResult<Option<Entity>>;

    /// Merge a non-empty patch into the stored row in one step.
    async fn update_entity(&self, id: EntityId, patch: EntityPatch) -> MosaicResult<Option<Entity>>;

    /// Soft delete marks the row `deleted`; hard delete removes it. Both
    /// return false when there was nothing to do.
    async fn delete_entity(&self, id: EntityId, hard: bool) -> MosaicResult<bool>;
}

/// Directed typed edges keyed by (source, target, relation type).
#[async_trait]
pub trait RelationGraph: Send + Sync {
    /// Insert the edge or merge `metadata` into the existing one.
    async fn upsert_relation(&self, key: &RelationKey, metadata: Attributes) -> MosaicResult<EntityRelation>;

    async fn delete_relation(&self, key: &RelationKey) -> MosaicResult<bool>;

    async fn get_relation(&self, key: &RelationKey) -> MosaicResult<Option<EntityRelation>>;

    /// Targets of `relation_type` edges leaving `source_id`, newest edge
    /// first. Missing, soft-deleted and out-of-scope targets are skipped.
    async fn related_from(
        &self,
        source_id: EntityId,
        relation_type: &str,
        target_type: Option<&str>,
        scope: TenantScope,
    ) -> MosaicResult<Vec<Entity>>;

    /// Sources of `relation_type` edges entering `target_id`, oldest edge
    /// first, with each edge's metadata and creation time. Sources outside
    /// `scope` are skipped.
    async fn related_to(
        &self,
        target_id: EntityId,
        relation_type: &str,
        scope: TenantScope,
    ) -> MosaicResult<Vec<RelatedEntity>>;
}

/// Executes validated query plans.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Count and fetch one page.
    async fn run_query(&self, plan: &QueryPlan) -> MosaicResult<Page<Entity>>;

    /// Fetch the first `plan.limit` matches without counting.
    async fn run_search(&self, plan: &QueryPlan) -> MosaicResult<Vec<Entity>>;
}

/// Source of truth for principal existence.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn principal_exists(&self, id: PrincipalId) -> MosaicResult<bool>;
}

/// Outcome of a referential consistency pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub dry_run: bool,
    /// Edges whose source or target row no longer exists.
    pub orphaned_relations: Vec<RelationKey>,
    /// Entities whose type name is not registered. Reported only.
    pub untyped_entities: Vec<EntityId>,
    pub relations_removed: u64,
}

/// Finds, and optionally removes, dangling references.
#[async_trait]
pub trait ConsistencySweep: Send + Sync {
    async fn sweep(&self, dry_run: bool) -> MosaicResult<SweepReport>;
}

/// Liveness of the underlying engine.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> MosaicResult<()>;
}

/// Everything a complete backend provides.
pub trait Backend:
    TypeRegistry + EntityStore + RelationGraph + QueryEngine + PrincipalDirectory + ConsistencySweep + StoreHealth
{
}

impl<T> Backend for T where
    T: TypeRegistry
        + EntityStore
        + RelationGraph
        + QueryEngine
        + PrincipalDirectory
        + ConsistencySweep
        + StoreHealth
{
}
