//! In-memory backend.
//!
//! Holds everything in maps behind async read-write locks. Locks are always
//! taken in the order types, entities, relations, principals.

use crate::traits::{
    ConsistencySweep, EntityStore, PrincipalDirectory, QueryEngine, RelationGraph, StoreHealth,
    SweepReport, TypeRegistry,
};
use async_trait::async_trait;
use chrono::Utc;
use mosaic_core::{
    ApplicationId, Attributes, Entity, EntityId, EntityPatch, EntityRelation, EntityType,
    EntityTypeId, EntityTypePatch, MosaicResult, Page, PrincipalId, QueryPlan, RelatedEntity,
    RelationDirection, RelationKey, TenantScope, ValidationError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRelation {
    /// Insertion order; breaks ties between equal creation times.
    seq: u64,
    relation: EntityRelation,
}

/// In-memory store implementing every backend trait.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    types: Arc<RwLock<HashMap<EntityTypeId, EntityType>>>,
    entities: Arc<RwLock<HashMap<EntityId, Entity>>>,
    relations: Arc<RwLock<BTreeMap<RelationKey, StoredRelation>>>,
    principals: Arc<RwLock<HashSet<PrincipalId>>>,
    next_seq: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` a known principal, so it can own entities.
    pub async fn register_principal(&self, id: PrincipalId) {
        self.principals.write().await.insert(id);
    }

    pub async fn entity_count(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn relation_count(&self) -> usize {
        self.relations.read().await.len()
    }

    /// Drop all stored data.
    pub async fn clear(&self) {
        self.types.write().await.clear();
        self.entities.write().await.clear();
        self.relations.write().await.clear();
        self.principals.write().await.clear();
    }

    /// Ids reachable through the plan's relation join, if it has one.
    async fn join_ids(&self, plan: &QueryPlan) -> Option<HashSet<EntityId>> {
        let join = plan.related.as_ref()?;
        let relations = self.relations.read().await;
        let ids = relations
            .keys()
            .filter(|key| key.relation_type == join.relation_type)
            .filter_map(|key| match join.direction {
                RelationDirection::Outgoing if key.source_id == join.entity_id => Some(key.target_id),
                RelationDirection::Incoming if key.target_id == join.entity_id => Some(key.source_id),
                _ => None,
            })
            .collect();
        Some(ids)
    }

    async fn matching(&self, plan: &QueryPlan) -> Vec<Entity> {
        let join = self.join_ids(plan).await;
        let entities = self.entities.read().await;
        let mut matches: Vec<Entity> = entities
            .values()
            .filter(|e| plan.matches(e))
            .filter(|e| join.as_ref().map(|ids| ids.contains(&e.id)).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by(|a, b| plan.compare(a, b));
        matches
    }
}

#[async_trait]
impl TypeRegistry for MemoryStore {
    async fn list_types(&self, application_id: Option<ApplicationId>) -> MosaicResult<Vec<EntityType>> {
        let types = self.types.read().await;
        let mut visible: Vec<EntityType> = types
            .values()
            .filter(|t| t.tenancy.visible_to(application_id))
            .cloned()
            .collect();
        visible.sort_by_key(|t| t.listing_key());
        Ok(visible)
    }

    async fn get_type(&self, name: &str) -> MosaicResult<Option<EntityType>> {
        let types = self.types.read().await;
        Ok(types.values().find(|t| t.name == name).cloned())
    }

    async fn get_type_by_id(&self, id: EntityTypeId) -> MosaicResult<Option<EntityType>> {
        Ok(self.types.read().await.get(&id).cloned())
    }

    async fn insert_type(&self, entity_type: &EntityType) -> MosaicResult<()> {
        let mut types = self.types.write().await;
        if types.values().any(|t| t.name == entity_type.name) {
            return Err(ValidationError::DuplicateName {
                name: entity_type.name.clone(),
            }
            .into());
        }
        types.insert(entity_type.id, entity_type.clone());
        Ok(())
    }

    async fn update_type(&self, id: EntityTypeId, patch: EntityTypePatch) -> MosaicResult<Option<EntityType>> {
        let mut types = self.types.write().await;
        let Some(entity_type) = types.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(entity_type, Utc::now());
        Ok(Some(entity_type.clone()))
    }

    async fn delete_type(&self, id: EntityTypeId) -> MosaicResult<bool> {
        let mut types = self.types.write().await;
        match types.get(&id) {
            Some(t) if !t.is_system => {
                types.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_entity(&self, entity: &Entity) -> MosaicResult<()> {
        self.entities.write().await.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: EntityId) -> MosaicResult<Option<Entity>> {
        Ok(self.entities.read().await.get(&id).cloned())
    }

    async fn update_entity(&self, id: EntityId, patch: EntityPatch) -> MosaicResult<Option<Entity>> {
        let mut entities = self.entities.write().await;
        let Some(entity) = entities.get_mut(&id) else {
            return Ok(None);
        };
        entity.apply_patch(patch, Utc::now());
        Ok(Some(entity.clone()))
    }

    async fn delete_entity(&self, id: EntityId, hard: bool) -> MosaicResult<bool> {
        let mut entities = self.entities.write().await;
        if hard {
            return Ok(entities.remove(&id).is_some());
        }
        match entities.get_mut(&id) {
            Some(entity) if !entity.is_deleted() => {
                entity.apply_patch(EntityPatch::status(mosaic_core::Status::deleted()), Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RelationGraph for MemoryStore {
    async fn upsert_relation(&self, key: &RelationKey, metadata: Attributes) -> MosaicResult<EntityRelation> {
        let mut relations = self.relations.write().await;
        let now = Utc::now();
        let stored = relations.entry(key.clone()).or_insert_with(|| StoredRelation {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            relation: EntityRelation::new(key.clone(), Attributes::new(), now),
        });
        stored.relation.relink(metadata, now);
        Ok(stored.relation.clone())
    }

    async fn delete_relation(&self, key: &RelationKey) -> MosaicResult<bool> {
        Ok(self.relations.write().await.remove(key).is_some())
    }

    async fn get_relation(&self, key: &RelationKey) -> MosaicResult<Option<EntityRelation>> {
        Ok(self.relations.read().await.get(key).map(|s| s.relation.clone()))
    }

    async fn related_from(
        &self,
        source_id: EntityId,
        relation_type: &str,
        target_type: Option<&str>,
        scope: TenantScope,
    ) -> MosaicResult<Vec<Entity>> {
        let entities = self.entities.read().await;
        let relations = self.relations.read().await;

        let mut edges: Vec<&StoredRelation> = relations
            .values()
            .filter(|s| s.relation.source_id == source_id && s.relation.relation_type == relation_type)
            .collect();
        edges.sort_by(|a, b| {
            b.relation
                .created_at
                .cmp(&a.relation.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(edges
            .into_iter()
            .filter_map(|s| entities.get(&s.relation.target_id))
            .filter(|e| !e.is_deleted() && scope.matches(&e.tenancy))
            .filter(|e| target_type.map(|t| e.type_name == t).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn related_to(
        &self,
        target_id: EntityId,
        relation_type: &str,
        scope: TenantScope,
    ) -> MosaicResult<Vec<RelatedEntity>> {
        let entities = self.entities.read().await;
        let relations = self.relations.read().await;

        let mut edges: Vec<&StoredRelation> = relations
            .values()
            .filter(|s| s.relation.target_id == target_id && s.relation.relation_type == relation_type)
            .collect();
        edges.sort_by(|a, b| {
            a.relation
                .created_at
                .cmp(&b.relation.created_at)
                .then(a.seq.cmp(&b.seq))
        });

        Ok(edges
            .into_iter()
            .filter_map(|s| {
                entities
                    .get(&s.relation.source_id)
                    .filter(|e| !e.is_deleted() && scope.matches(&e.tenancy))
                    .map(|e| RelatedEntity::new(e.clone(), &s.relation))
            })
            .collect())
    }
}

#[async_trait]
impl QueryEngine for MemoryStore {
    async fn run_query(&self, plan: &QueryPlan) -> MosaicResult<Page<Entity>> {
        let matches = self.matching(plan).await;
        let total = matches.len() as u64;
        Ok(Page {
            entities: plan.window(matches),
            total,
            page: plan.page,
            limit: plan.limit,
        })
    }

    async fn run_search(&self, plan: &QueryPlan) -> MosaicResult<Vec<Entity>> {
        let matches = self.matching(plan).await;
        Ok(plan.window(matches))
    }
}

#[async_trait]
impl PrincipalDirectory for MemoryStore {
    async fn principal_exists(&self, id: PrincipalId) -> MosaicResult<bool> {
        Ok(self.principals.read().await.contains(&id))
    }
}

#[async_trait]
impl ConsistencySweep for MemoryStore {
    async fn sweep(&self, dry_run: bool) -> MosaicResult<SweepReport> {
        let types = self.types.read().await;
        let entities = self.entities.read().await;
        let mut relations = self.relations.write().await;

        let orphaned_relations: Vec<RelationKey> = relations
            .keys()
            .filter(|k| !entities.contains_key(&k.source_id) || !entities.contains_key(&k.target_id))
            .cloned()
            .collect();

        let registered: HashSet<&str> = types.values().map(|t| t.name.as_str()).collect();
        let mut untyped_entities: Vec<EntityId> = entities
            .values()
            .filter(|e| !registered.contains(e.type_name.as_str()))
            .map(|e| e.id)
            .collect();
        untyped_entities.sort();

        let mut relations_removed = 0;
        if !dry_run {
            for key in &orphaned_relations {
                if relations.remove(key).is_some() {
                    relations_removed += 1;
                }
            }
        }

        Ok(SweepReport {
            dry_run,
            orphaned_relations,
            untyped_entities,
            relations_removed,
        })
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> MosaicResult<()> {
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
