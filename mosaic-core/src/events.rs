//! Change events emitted after successful mutations.

use crate::identity::{EntityId, EntityTypeId, Timestamp};
use crate::relation::RelationKey;
use crate::tenancy::Tenancy;
use serde::{Deserialize, Serialize};

/// A completed state change, handed to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    TypeCreated {
        type_id: EntityTypeId,
        name: String,
        tenancy: Tenancy,
    },
    TypeUpdated {
        type_id: EntityTypeId,
        name: String,
    },
    TypeDeleted {
        type_id: EntityTypeId,
    },
    EntityCreated {
        entity_id: EntityId,
        type_name: String,
        tenancy: Tenancy,
    },
    EntityUpdated {
        entity_id: EntityId,
    },
    EntityDeleted {
        entity_id: EntityId,
        hard: bool,
    },
    RelationUpserted {
        key: RelationKey,
    },
    RelationDeleted {
        key: RelationKey,
    },
    OrphansSwept {
        relations_removed: u64,
    },
}

impl ChangeEvent {
    /// Stable short name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeEvent::TypeCreated { .. } => "type_created",
            ChangeEvent::TypeUpdated { .. } => "type_updated",
            ChangeEvent::TypeDeleted { .. } => "type_deleted",
            ChangeEvent::EntityCreated { .. } => "entity_created",
            ChangeEvent::EntityUpdated { .. } => "entity_updated",
            ChangeEvent::EntityDeleted { .. } => "entity_deleted",
            ChangeEvent::RelationUpserted { .. } => "relation_upserted",
            ChangeEvent::RelationDeleted { .. } => "relation_deleted",
            ChangeEvent::OrphansSwept { .. } => "orphans_swept",
        }
    }
}

/// An event with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: Timestamp,
    #[serde(flatten)]
    pub event: ChangeEvent,
}
