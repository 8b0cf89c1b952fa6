//! Directed, typed relations between entities.

use crate::entity::Entity;
use crate::identity::{EntityId, Timestamp};
use crate::value::Attributes;
use serde::{Deserialize, Serialize};

/// Identity of an edge. At most one edge exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationKey {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: String,
}

impl RelationKey {
    pub fn new(source_id: EntityId, target_id: EntityId, relation_type: impl Into<String>) -> Self {
        Self {
            source_id,
            target_id,
            relation_type: relation_type.into(),
        }
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relation_type: String,
    pub metadata: Attributes,
    /// Set once when the edge is first created; the "joined at" time.
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl EntityRelation {
    pub fn new(key: RelationKey, metadata: Attributes, now: Timestamp) -> Self {
        Self {
            source_id: key.source_id,
            target_id: key.target_id,
            relation_type: key.relation_type,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.source_id, self.target_id, self.relation_type.clone())
    }

    /// Re-link an existing edge: merge metadata, keep the creation time.
    pub fn relink(&mut self, metadata: Attributes, now: Timestamp) {
        self.metadata.merge(metadata);
        self.updated_at = now;
    }
}

/// An entity reached through an edge, with that edge's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntity {
    pub entity: Entity,
    pub relation_metadata: Attributes,
    pub joined_at: Timestamp,
}

impl RelatedEntity {
    pub fn new(entity: Entity, relation: &EntityRelation) -> Self {
        Self {
            entity,
            relation_metadata: relation.metadata.clone(),
            joined_at: relation.created_at,
        }
    }
}
