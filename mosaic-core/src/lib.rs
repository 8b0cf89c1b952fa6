//! Mosaic Core - Data Types
//!
//! Plain data structures shared by every Mosaic crate: identifiers, tenancy,
//! attribute payloads, entity types, entities, relations, query plans and the
//! error taxonomy. No I/O happens here.

pub mod config;
pub mod entity;
pub mod entity_type;
pub mod error;
pub mod events;
pub mod identity;
pub mod query;
pub mod relation;
pub mod tenancy;
pub mod value;

pub use config::StoreConfig;
pub use entity::{Entity, EntityPatch, NewEntity, Status};
pub use entity_type::{
    normalize_type_name, AttributeDef, AttributeKind, EntityType, EntityTypePatch, NewEntityType,
    SchemaViolation,
};
pub use error::{ConfigError, MosaicError, MosaicResult, StorageError, ValidationError};
pub use events::{AuditRecord, ChangeEvent};
pub use identity::{
    ApplicationId, EntityId, EntityIdType, EntityTypeId, PrincipalId, Timestamp,
};
pub use query::{
    plan_search, validate_field_name, BaseColumn, EntityQuery, OrderDir, Page, QueryPlan,
    RelationDirection, RelationJoin, SearchOptions, SortField, StatusFilter,
};
pub use relation::{EntityRelation, RelatedEntity, RelationKey};
pub use tenancy::{Tenancy, TenantScope};
pub use value::{AttrValue, Attributes};
