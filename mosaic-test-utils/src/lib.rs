//! Mosaic Test Utilities
//!
//! Shared test infrastructure for the Mosaic workspace:
//! - Proptest generators for identifiers and attribute payloads
//! - Fixtures for services backed by the in-memory store
//! - Assertions for the error taxonomy

pub use mosaic_storage::{EntityService, MemoryStore, RecordingAuditSink};

pub use mosaic_core::{
    attrs, ApplicationId, AttrValue, AttributeDef, AttributeKind, Attributes, Entity, EntityId,
    EntityIdType, EntityType, MosaicError, MosaicResult, NewEntity, NewEntityType, PrincipalId,
    Status, StoreConfig, Tenancy, TenantScope, ValidationError,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Mosaic values.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_application_id() -> impl Strategy<Value = ApplicationId> {
        arb_uuid().prop_map(ApplicationId::new)
    }

    pub fn arb_tenancy() -> impl Strategy<Value = Tenancy> {
        prop_oneof![
            Just(Tenancy::Global),
            arb_application_id().prop_map(Tenancy::Scoped),
        ]
    }

    pub fn arb_status() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::active()),
            Just(Status::deleted()),
            "[a-z]{3,10}".prop_map(Status::new),
        ]
    }

    /// Raw type names, including ones that need normalization.
    pub fn arb_type_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z][a-z0-9_]{1,20}",
            "[A-Z][a-z]{2,10}( [A-Z]?[a-z]{2,10})?",
            " {0,2}[a-z]{3,8} {0,2}",
        ]
    }

    /// Scalar attribute values. Floats are finite.
    pub fn arb_scalar() -> impl Strategy<Value = AttrValue> {
        prop_oneof![
            Just(AttrValue::Null),
            any::<bool>().prop_map(AttrValue::Bool),
            any::<i64>().prop_map(AttrValue::Integer),
            any::<u64>().prop_map(AttrValue::from),
            (-1.0e9f64..1.0e9).prop_map(AttrValue::Float),
            "[a-zA-Z0-9 _-]{0,24}".prop_map(AttrValue::String),
        ]
    }

    /// Arbitrary attribute values, nested up to three levels.
    pub fn arb_attr_value() -> impl Strategy<Value = AttrValue> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(AttrValue::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4).prop_map(AttrValue::Object),
            ]
        })
    }

    pub fn arb_attributes() -> impl Strategy<Value = Attributes> {
        prop::collection::btree_map("[a-z_][a-z0-9_]{0,10}", arb_attr_value(), 0..8)
            .prop_map(Attributes::from)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built services and inputs for common scenarios.

    use super::*;
    use std::sync::Arc;

    /// A service over an empty in-memory store, with a recording audit sink.
    pub fn memory_service() -> (EntityService, Arc<MemoryStore>, Arc<RecordingAuditSink>) {
        memory_service_with(StoreConfig::default())
    }

    pub fn memory_service_with(config: StoreConfig) -> (EntityService, Arc<MemoryStore>, Arc<RecordingAuditSink>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let service = EntityService::new(store.clone(), config).with_audit_sink(audit.clone());
        (service, store, audit)
    }

    /// The `note` type: a string body and a numeric rank.
    pub fn note_type_input() -> NewEntityType {
        NewEntityType {
            display_name: Some("Note".to_string()),
            category: Some("content".to_string()),
            schema: vec![
                AttributeDef::new("body", AttributeKind::String).required(),
                AttributeDef::new("rank", AttributeKind::Number),
            ],
            ..NewEntityType::new("note")
        }
    }

    /// A system type that cannot be deleted.
    pub fn system_type_input() -> NewEntityType {
        NewEntityType {
            display_name: Some("User Profile".to_string()),
            category: Some("system".to_string()),
            is_system: true,
            schema: vec![AttributeDef::new("display_name", AttributeKind::String)],
            ..NewEntityType::new("user_profile")
        }
    }

    /// Register the `note` type and create `count` notes with bodies
    /// `note 0`, `note 1`, ... and ranks equal to their index.
    pub async fn seed_notes(service: &EntityService, count: usize) -> MosaicResult<Vec<Entity>> {
        if service.get_type("note").await?.is_none() {
            service.create_type(note_type_input()).await?;
        }
        let mut created = Vec::with_capacity(count);
        for i in 0..count {
            let attributes = attrs! { "body" => format!("note {i}"), "rank" => i as i64 };
            created.push(service.create_entity("note", NewEntity::new(attributes)).await?);
        }
        Ok(created)
    }

    /// A principal registered in `store`.
    pub async fn registered_principal(store: &MemoryStore) -> PrincipalId {
        let id = PrincipalId::now_v7();
        store.register_principal(id).await;
        id
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the Mosaic error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &MosaicResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &MosaicResult<T>) {
        match result {
            Err(MosaicError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_malformed_filter<T: std::fmt::Debug>(result: &MosaicResult<T>, field: &str) {
        match result {
            Err(MosaicError::Validation(ValidationError::MalformedFilter { field: f, .. })) => {
                assert_eq!(f, field, "Wrong field in MalformedFilter error");
            }
            other => panic!("Expected MalformedFilter on '{}', got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_duplicate_name<T: std::fmt::Debug>(result: &MosaicResult<T>) {
        match result {
            Err(MosaicError::Validation(ValidationError::DuplicateName { .. })) => {}
            other => panic!("Expected DuplicateName error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_owner<T: std::fmt::Debug>(result: &MosaicResult<T>, owner: PrincipalId) {
        match result {
            Err(MosaicError::Validation(ValidationError::InvalidOwner { owner_id })) => {
                assert_eq!(*owner_id, owner, "Wrong owner in InvalidOwner error");
            }
            other => panic!("Expected InvalidOwner for {}, got: {:?}", owner, other),
        }
    }

    /// Assert that two attribute maps hold the same keys with JSON-equal values.
    #[track_caller]
    pub fn assert_attributes_json_eq(actual: &Attributes, expected: &Attributes) {
        assert_eq!(actual.len(), expected.len(), "Attribute key counts differ");
        for (key, value) in expected.iter() {
            let found = actual
                .get(key)
                .unwrap_or_else(|| panic!("Missing attribute '{}'", key));
            assert!(
                found.json_eq(value),
                "Attribute '{}' differs: {:?} vs {:?}",
                key,
                found,
                value
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_seed_notes_registers_type_once() {
        let (service, store, _) = memory_service();
        seed_notes(&service, 3).await.unwrap();
        seed_notes(&service, 2).await.unwrap();
        assert_eq!(store.entity_count().await, 5);
        assert_eq!(service.list_types(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assertions_match_service_errors() {
        let (service, _, _) = memory_service();
        service.create_type(note_type_input()).await.unwrap();
        assert_duplicate_name(&service.create_type(note_type_input()).await);

        let owner = PrincipalId::now_v7();
        let result = service
            .create_entity("note", NewEntity::default().with_owner(owner))
            .await;
        assert_invalid_owner(&result, owner);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Attribute payloads survive a JSON round trip, up to numeric
        /// representation.
        #[test]
        fn prop_attributes_json_roundtrip(attributes in arb_attributes()) {
            let text = serde_json::to_string(&attributes).unwrap();
            let back: Attributes = serde_json::from_str(&text).unwrap();
            assert_attributes_json_eq(&back, &attributes);
        }

        /// Generated type names normalize to a non-empty lowercase name.
        #[test]
        fn prop_type_names_normalize(name in arb_type_name()) {
            let normalized = mosaic_core::normalize_type_name(&name).unwrap();
            prop_assert!(!normalized.is_empty());
            prop_assert_eq!(normalized.clone(), normalized.to_lowercase());
            prop_assert!(!normalized.contains(' '));
        }
    }
}
