//! Entity records.

use crate::error::ValidationError;
use crate::identity::{EntityId, EntityIdType, PrincipalId, Timestamp};
use crate::tenancy::Tenancy;
use crate::value::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an entity.
///
/// Open-ended string; only `active` and `deleted` carry meaning to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    pub const ACTIVE: &'static str = "active";
    pub const DELETED: &'static str = "deleted";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn active() -> Self {
        Self(Self::ACTIVE.to_string())
    }

    pub fn deleted() -> Self {
        Self(Self::DELETED.to_string())
    }

    pub fn is_deleted(&self) -> bool {
        self.0 == Self::DELETED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::active()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    /// Name of the entity's type. Not enforced against the registry.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "applicationId")]
    pub tenancy: Tenancy,
    pub owner_id: Option<PrincipalId>,
    pub status: Status,
    pub attributes: Attributes,
    pub metadata: Attributes,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.status.is_deleted()
    }

    /// Apply a patch in place. Attributes and metadata are shallow-merged,
    /// status is replaced. An empty patch is a no-op and keeps `updated_at`.
    pub fn apply_patch(&mut self, patch: EntityPatch, now: Timestamp) {
        if patch.is_empty() {
            return;
        }
        if let Some(attributes) = patch.attributes {
            self.attributes.merge(attributes);
        }
        if let Some(metadata) = patch.metadata {
            self.metadata.merge(metadata);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = now;
    }
}

/// Input for creating an entity. The type name is supplied separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    #[serde(default, rename = "applicationId")]
    pub tenancy: Tenancy,
    #[serde(default)]
    pub owner_id: Option<PrincipalId>,
    #[serde(default)]
    pub status: Option<Status>,
}

impl NewEntity {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            ..Default::default()
        }
    }

    pub fn with_tenancy(mut self, tenancy: Tenancy) -> Self {
        self.tenancy = tenancy;
        self
    }

    pub fn with_owner(mut self, owner_id: PrincipalId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build the stored record. `type_name` must already be normalized.
    pub fn into_entity(self, type_name: String, now: Timestamp) -> Result<Entity, ValidationError> {
        if type_name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "type".to_string(),
            });
        }
        Ok(Entity {
            id: EntityId::now_v7(),
            type_name,
            tenancy: self.tenancy,
            owner_id: self.owner_id,
            status: self.status.unwrap_or_default(),
            attributes: self.attributes,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub metadata: Option<Attributes>,
    #[serde(default)]
    pub status: Option<Status>,
}

impl EntityPatch {
    pub fn attributes(attributes: Attributes) -> Self {
        Self {
            attributes: Some(attributes),
            ..Default::default()
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_none() && self.metadata.is_none() && self.status.is_none()
    }
}
