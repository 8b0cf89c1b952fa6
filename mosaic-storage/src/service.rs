//! Service facade over a backend.
//!
//! `EntityService` is the single entry point used by transports. It
//! normalizes type names, validates inputs, applies the injected
//! [`StoreConfig`], checks owners, logs and emits change events. Backends
//! stay dumb.

use crate::audit::{AuditSink, TracingAuditSink};
use crate::traits::{Backend, SweepReport};
use chrono::Utc;
use mosaic_core::{
    normalize_type_name, plan_search, ApplicationId, Attributes, ChangeEvent, Entity, EntityId,
    EntityPatch, EntityQuery, EntityRelation, EntityType, EntityTypeId, EntityTypePatch,
    MosaicResult, NewEntity, NewEntityType, Page, RelatedEntity, RelationKey, SearchOptions,
    StoreConfig, TenantScope, ValidationError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for all store operations.
#[derive(Clone)]
pub struct EntityService {
    backend: Arc<dyn Backend>,
    audit: Arc<dyn AuditSink>,
    config: StoreConfig,
}

impl std::fmt::Debug for EntityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EntityService {
    pub fn new(backend: Arc<dyn Backend>, config: StoreConfig) -> Self {
        Self {
            backend,
            audit: Arc::new(TracingAuditSink),
            config,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The caller's application, falling back to the configured default.
    pub fn resolve_application(&self, explicit: Option<ApplicationId>) -> Option<ApplicationId> {
        explicit.or(self.config.default_application)
    }

    pub async fn ping(&self) -> MosaicResult<()> {
        self.backend.ping().await
    }

    // ========================================================================
    // TYPE REGISTRY
    // ========================================================================

    pub async fn list_types(&self, application_id: Option<ApplicationId>) -> MosaicResult<Vec<EntityType>> {
        self.backend.list_types(application_id).await
    }

    /// Look up a type by name. The name is normalized first.
    pub async fn get_type(&self, name: &str) -> MosaicResult<Option<EntityType>> {
        match normalize_type_name(name) {
            Ok(normalized) => self.backend.get_type(&normalized).await,
            Err(_) => Ok(None),
        }
    }

    pub async fn get_type_by_id(&self, id: EntityTypeId) -> MosaicResult<Option<EntityType>> {
        self.backend.get_type_by_id(id).await
    }

    /// Resolve a path key that is either a type id or a type name.
    pub async fn resolve_type(&self, key: &str) -> MosaicResult<Option<EntityType>> {
        match key.parse::<EntityTypeId>() {
            Ok(id) => self.get_type_by_id(id).await,
            Err(_) => self.get_type(key).await,
        }
    }

    pub async fn create_type(&self, input: NewEntityType) -> MosaicResult<EntityType> {
        let entity_type = input.into_entity_type(Utc::now())?;
        if self.backend.get_type(&entity_type.name).await?.is_some() {
            warn!(name = %entity_type.name, "Rejected duplicate entity type");
            return Err(ValidationError::DuplicateName {
                name: entity_type.name,
            }
            .into());
        }
        self.backend.insert_type(&entity_type).await?;

        info!(type_id = %entity_type.id, name = %entity_type.name, "Entity type created");
        self.audit.record(ChangeEvent::TypeCreated {
            type_id: entity_type.id,
            name: entity_type.name.clone(),
            tenancy: entity_type.tenancy,
        });
        Ok(entity_type)
    }

    pub async fn update_type(&self, id: EntityTypeId, patch: EntityTypePatch) -> MosaicResult<Option<EntityType>> {
        patch.validate()?;
        if patch.is_empty() {
            return self.backend.get_type_by_id(id).await;
        }
        let updated = self.backend.update_type(id, patch).await?;
        if let Some(entity_type) = &updated {
            info!(type_id = %entity_type.id, name = %entity_type.name, "Entity type updated");
            self.audit.record(ChangeEvent::TypeUpdated {
                type_id: entity_type.id,
                name: entity_type.name.clone(),
            });
        }
        Ok(updated)
    }

    /// Delete a type. System types and unknown ids yield `false`. Entities
    /// of the type are left in place.
    pub async fn delete_type(&self, id: EntityTypeId) -> MosaicResult<bool> {
        match self.backend.get_type_by_id(id).await? {
            None => return Ok(false),
            Some(t) if t.is_system => {
                warn!(type_id = %id, name = %t.name, "Refused to delete system entity type");
                return Ok(false);
            }
            Some(_) => {}
        }
        let deleted = self.backend.delete_type(id).await?;
        if deleted {
            info!(type_id = %id, "Entity type deleted");
            self.audit.record(ChangeEvent::TypeDeleted { type_id: id });
        }
        Ok(deleted)
    }

    // ========================================================================
    // ENTITY STORE
    // ========================================================================

    /// Create an entity of `type_name`. The owner, if any, must exist.
    pub async fn create_entity(&self, type_name: &str, input: NewEntity) -> MosaicResult<Entity> {
        let type_name = normalize_type_name(type_name)?;

        if let Some(owner_id) = input.owner_id {
            if !self.backend.principal_exists(owner_id).await? {
                warn!(%owner_id, "Rejected entity with unknown owner");
                return Err(ValidationError::InvalidOwner { owner_id }.into());
            }
        }

        let entity = input.into_entity(type_name, Utc::now())?;
        self.check_schema(&entity.type_name, &entity.attributes).await?;
        self.backend.insert_entity(&entity).await?;

        info!(entity_id = %entity.id, entity_type = %entity.type_name, "Entity created");
        self.audit.record(ChangeEvent::EntityCreated {
            entity_id: entity.id,
            type_name: entity.type_name.clone(),
            tenancy: entity.tenancy,
        });
        Ok(entity)
    }

    pub async fn get_entity(&self, id: EntityId) -> MosaicResult<Option<Entity>> {
        self.backend.get_entity(id).await
    }

    /// Merge a patch. An empty patch returns the current record untouched.
    pub async fn update_entity(&self, id: EntityId, patch: EntityPatch) -> MosaicResult<Option<Entity>> {
        if patch.is_empty() {
            return self.backend.get_entity(id).await;
        }
        let touches_attributes = patch.attributes.is_some();
        let updated = self.backend.update_entity(id, patch).await?;

        if let Some(entity) = &updated {
            if touches_attributes {
                self.check_schema(&entity.type_name, &entity.attributes).await?;
            }
            debug!(entity_id = %entity.id, status = %entity.status, "Entity updated");
            self.audit.record(ChangeEvent::EntityUpdated { entity_id: entity.id });
        }
        Ok(updated)
    }

    /// Soft or hard delete. Relations pointing at a hard-deleted entity are
    /// left dangling until a sweep removes them.
    pub async fn delete_entity(&self, id: EntityId, hard: bool) -> MosaicResult<bool> {
        let deleted = self.backend.delete_entity(id, hard).await?;
        if deleted {
            info!(entity_id = %id, hard, "Entity deleted");
            self.audit.record(ChangeEvent::EntityDeleted { entity_id: id, hard });
        }
        Ok(deleted)
    }

    /// Log advisory schema mismatches. Never rejects.
    async fn check_schema(&self, type_name: &str, attributes: &Attributes) -> MosaicResult<()> {
        match self.backend.get_type(type_name).await? {
            Some(entity_type) => {
                for violation in entity_type.check_attributes(attributes) {
                    warn!(
                        entity_type = %type_name,
                        attribute = %violation.attribute,
                        message = %violation.message,
                        "Attributes do not match advisory schema"
                    );
                }
            }
            None => debug!(entity_type = %type_name, "Entity written for unregistered type"),
        }
        Ok(())
    }

    // ========================================================================
    // RELATION GRAPH
    // ========================================================================

    /// Link two entities, merging metadata into any existing edge.
    pub async fn create_relation(
        &self,
        source_id: EntityId,
        target_id: EntityId,
        relation_type: &str,
        metadata: Attributes,
    ) -> MosaicResult<EntityRelation> {
        let key = relation_key(source_id, target_id, relation_type)?;
        let relation = self.backend.upsert_relation(&key, metadata).await?;
        debug!(source = %source_id, target = %target_id, relation_type = %key.relation_type, "Relation upserted");
        self.audit.record(ChangeEvent::RelationUpserted { key });
        Ok(relation)
    }

    pub async fn delete_relation(
        &self,
        source_id: EntityId,
        target_id: EntityId,
        relation_type: &str,
    ) -> MosaicResult<bool> {
        let key = relation_key(source_id, target_id, relation_type)?;
        let deleted = self.backend.delete_relation(&key).await?;
        if deleted {
            debug!(source = %source_id, target = %target_id, relation_type = %key.relation_type, "Relation deleted");
            self.audit.record(ChangeEvent::RelationDeleted { key });
        }
        Ok(deleted)
    }

    pub async fn has_relation(
        &self,
        source_id: EntityId,
        target_id: EntityId,
        relation_type: &str,
    ) -> MosaicResult<bool> {
        let key = relation_key(source_id, target_id, relation_type)?;
        Ok(self.backend.get_relation(&key).await?.is_some())
    }

    pub async fn get_relation(
        &self,
        source_id: EntityId,
        target_id: EntityId,
        relation_type: &str,
    ) -> MosaicResult<Option<EntityRelation>> {
        let key = relation_key(source_id, target_id, relation_type)?;
        self.backend.get_relation(&key).await
    }

    /// Outgoing traversal, newest edge first.
    pub async fn related_from(
        &self,
        source_id: EntityId,
        relation_type: &str,
        target_type: Option<&str>,
        scope: TenantScope,
    ) -> MosaicResult<Vec<Entity>> {
        let target_type = target_type.map(normalize_type_name).transpose()?;
        self.backend
            .related_from(source_id, relation_type.trim(), target_type.as_deref(), scope)
            .await
    }

    /// Incoming traversal, oldest edge first, with edge metadata.
    pub async fn related_to(
        &self,
        target_id: EntityId,
        relation_type: &str,
        scope: TenantScope,
    ) -> MosaicResult<Vec<RelatedEntity>> {
        self.backend.related_to(target_id, relation_type.trim(), scope).await
    }

    // ========================================================================
    // QUERY ENGINE
    // ========================================================================

    /// Paginated query over one type. An unregistered type yields an empty page.
    pub async fn query(&self, type_name: &str, query: EntityQuery) -> MosaicResult<Page<Entity>> {
        let Some(entity_type) = self.get_type(type_name).await? else {
            debug!(entity_type = %type_name, "Query on unregistered type");
            return Ok(Page::empty(query.page.max(1), self.config.effective_limit(query.limit)));
        };

        let plan = query.plan(&entity_type, &self.config).map_err(|e| {
            warn!(entity_type = %entity_type.name, error = %e, "Rejected query");
            e
        })?;
        debug!(
            entity_type = %plan.type_name,
            filters = plan.filters.len(),
            search = plan.search.is_some(),
            page = plan.page,
            limit = plan.limit,
            "Running entity query"
        );
        self.backend.run_query(&plan).await
    }

    /// Typeahead search: newest first, capped at the search limit.
    pub async fn search(&self, type_name: &str, text: &str, options: SearchOptions) -> MosaicResult<Vec<Entity>> {
        let Some(entity_type) = self.get_type(type_name).await? else {
            return Ok(Vec::new());
        };
        let plan = plan_search(&entity_type, text, &options, &self.config);
        self.backend.run_search(&plan).await
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    pub async fn sweep(&self, dry_run: bool) -> MosaicResult<SweepReport> {
        let report = self.backend.sweep(dry_run).await?;
        info!(
            dry_run,
            orphaned_relations = report.orphaned_relations.len(),
            untyped_entities = report.untyped_entities.len(),
            relations_removed = report.relations_removed,
            "Consistency sweep finished"
        );
        if report.relations_removed > 0 {
            self.audit.record(ChangeEvent::OrphansSwept {
                relations_removed: report.relations_removed,
            });
        }
        Ok(report)
    }
}

fn relation_key(source_id: EntityId, target_id: EntityId, relation_type: &str) -> MosaicResult<RelationKey> {
    let relation_type = relation_type.trim();
    if relation_type.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "relationType".to_string(),
        }
        .into());
    }
    Ok(RelationKey::new(source_id, target_id, relation_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::memory::MemoryStore;
    use mosaic_core::{
        attrs, AttributeDef, AttributeKind, EntityIdType, MosaicError, PrincipalId, Status,
    };

    fn service() -> (EntityService, Arc<MemoryStore>, Arc<RecordingAuditSink>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let service = EntityService::new(store.clone(), StoreConfig::default()).with_audit_sink(audit.clone());
        (service, store, audit)
    }

    async fn note_type(service: &EntityService) -> EntityType {
        service
            .create_type(NewEntityType {
                schema: vec![AttributeDef::new("body", AttributeKind::String)],
                ..NewEntityType::new("Note")
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_type_duplicate_after_normalization() {
        let (service, _, _) = service();
        note_type(&service).await;

        let err = service.create_type(NewEntityType::new("  NOTE ")).await.unwrap_err();
        assert!(matches!(err, MosaicError::Validation(ValidationError::DuplicateName { .. })));
    }

    #[tokio::test]
    async fn test_resolve_type_by_id_or_name() {
        let (service, _, _) = service();
        let ty = note_type(&service).await;

        assert_eq!(service.resolve_type(&ty.id.to_string()).await.unwrap().unwrap().id, ty.id);
        assert_eq!(service.resolve_type("Note").await.unwrap().unwrap().id, ty.id);
        assert!(service.resolve_type("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_entity_rejects_unknown_owner() {
        let (service, store, _) = service();
        let owner = PrincipalId::now_v7();

        let err = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "x" }).with_owner(owner))
            .await
            .unwrap_err();
        assert_eq!(err, MosaicError::Validation(ValidationError::InvalidOwner { owner_id: owner }));
        assert_eq!(store.entity_count().await, 0);

        store.register_principal(owner).await;
        let entity = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "x" }).with_owner(owner))
            .await
            .unwrap();
        assert_eq!(entity.owner_id, Some(owner));
    }

    #[tokio::test]
    async fn test_schema_mismatch_does_not_block_writes() {
        let (service, _, _) = service();
        note_type(&service).await;

        let entity = service
            .create_entity("note", NewEntity::new(attrs! { "body" => 42i64 }))
            .await
            .unwrap();
        assert_eq!(entity.attributes.get("body"), Some(&mosaic_core::AttrValue::Integer(42)));
    }

    #[tokio::test]
    async fn test_empty_patch_is_noop() {
        let (service, _, audit) = service();
        let entity = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "x" }))
            .await
            .unwrap();

        let same = service
            .update_entity(entity.id, EntityPatch::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(same, entity);
        assert!(!audit
            .events()
            .iter()
            .any(|e| matches!(e, ChangeEvent::EntityUpdated { .. })));
    }

    #[tokio::test]
    async fn test_deleted_entity_can_be_reactivated() {
        let (service, _, _) = service();
        let entity = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "x" }))
            .await
            .unwrap();

        assert!(service.delete_entity(entity.id, false).await.unwrap());
        let revived = service
            .update_entity(entity.id, EntityPatch::status(Status::active()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revived.status, Status::active());
    }

    #[tokio::test]
    async fn test_query_unregistered_type_is_empty() {
        let (service, _, _) = service();
        let page = service.query("ghost", EntityQuery::new()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.entities.is_empty());
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 20);
    }

    #[tokio::test]
    async fn test_query_rejects_unknown_filter_key() {
        let (service, _, _) = service();
        note_type(&service).await;
        let err = service
            .query("note", EntityQuery::new().filter("password", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MosaicError::Validation(ValidationError::MalformedFilter { .. })));
    }

    #[tokio::test]
    async fn test_relation_type_required() {
        let (service, _, _) = service();
        let err = service
            .create_relation(EntityId::now_v7(), EntityId::now_v7(), "  ", Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MosaicError::Validation(ValidationError::RequiredFieldMissing { .. })));
    }

    #[tokio::test]
    async fn test_events_emitted_for_mutations() {
        let (service, _, audit) = service();
        let ty = note_type(&service).await;
        let a = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "a" }))
            .await
            .unwrap();
        let b = service
            .create_entity("note", NewEntity::new(attrs! { "body" => "b" }))
            .await
            .unwrap();
        service.create_relation(a.id, b.id, "liked", Attributes::new()).await.unwrap();
        service.delete_relation(a.id, b.id, "liked").await.unwrap();
        assert!(!service.delete_relation(a.id, b.id, "liked").await.unwrap());
        service.delete_entity(a.id, true).await.unwrap();
        service.delete_type(ty.id).await.unwrap();

        let names: Vec<&'static str> = audit.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "type_created",
                "entity_created",
                "entity_created",
                "relation_upserted",
                "relation_deleted",
                "entity_deleted",
                "type_deleted",
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_application_uses_default() {
        let store = Arc::new(MemoryStore::new());
        let default_app = ApplicationId::now_v7();
        let service = EntityService::new(store, StoreConfig::default().with_default_application(default_app));
        let explicit = ApplicationId::now_v7();

        assert_eq!(service.resolve_application(None), Some(default_app));
        assert_eq!(service.resolve_application(Some(explicit)), Some(explicit));
    }
}
