#![cfg(feature = "db-tests")]
//! Property tests against a live PostgreSQL database.
//!
//! Connection settings come from the `MOSAIC_DB_*` variables. The schema is
//! migrated on first use; each case registers its own uniquely named type so
//! cases never see each other's rows.

use std::sync::Arc;

use mosaic_api::{run_migrations, DbClient, DbConfig};
use mosaic_core::{
    attrs, AttributeDef, AttributeKind, Attributes, EntityIdType, EntityPatch, EntityQuery,
    NewEntity, NewEntityType, OrderDir, PrincipalId, SearchOptions, Status, StoreConfig, Tenancy,
    TenantScope,
};
use mosaic_storage::EntityService;
use mosaic_test_utils::generators::arb_attributes;
use mosaic_test_utils::assertions::{assert_attributes_json_eq, assert_invalid_owner, assert_malformed_filter};
use proptest::prelude::*;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

async fn test_service() -> (EntityService, DbClient) {
    let db = DbClient::from_config(&DbConfig::from_env()).expect("Failed to create pool");
    run_migrations(&db).await.expect("Failed to migrate");
    let service = EntityService::new(Arc::new(db.clone()), StoreConfig::default());
    (service, db)
}

/// Register a type with a unique name and the given attribute keys.
async fn unique_type(service: &EntityService, keys: &[&str]) -> String {
    let name = format!("t_{}", mosaic_core::EntityId::now_v7().as_uuid().simple());
    let schema = keys
        .iter()
        .map(|k| AttributeDef::new(*k, AttributeKind::String))
        .collect();
    service
        .create_type(NewEntityType {
            schema,
            ..NewEntityType::new(name.clone())
        })
        .await
        .expect("Failed to create type");
    name
}

// ============================================================================
// EXAMPLE-BASED TESTS
// ============================================================================

#[tokio::test]
async fn test_query_predicates_against_postgres() {
    let (service, _) = test_service().await;
    let type_name = unique_type(&service, &["body", "rank"]).await;

    for i in 0..15i64 {
        service
            .create_entity(&type_name, NewEntity::new(attrs! { "body" => format!("item {i}"), "rank" => i }))
            .await
            .unwrap();
    }

    let page = service
        .query(&type_name, EntityQuery::new().page(2, 5).order_by("rank", OrderDir::Asc))
        .await
        .unwrap();
    assert_eq!(page.total, 15);
    let ranks: Vec<i64> = page
        .entities
        .iter()
        .filter_map(|e| match e.attributes.get("rank") {
            Some(mosaic_core::AttrValue::Integer(r)) => Some(*r),
            _ => None,
        })
        .collect();
    assert_eq!(ranks, vec![5, 6, 7, 8, 9]);

    let filtered = service
        .query(&type_name, EntityQuery::new().filter("rank", 7i64))
        .await
        .unwrap();
    assert_eq!(filtered.total, 1);

    let searched = service
        .query(&type_name, EntityQuery::new().search("ITEM 1"))
        .await
        .unwrap();
    // item 1, item 10..item 14
    assert_eq!(searched.total, 6);

    // LIKE metacharacters are matched literally.
    let wildcard = service
        .query(&type_name, EntityQuery::new().search("%"))
        .await
        .unwrap();
    assert_eq!(wildcard.total, 0);

    let rejected = service
        .query(&type_name, EntityQuery::new().filter("body' OR 1=1 --", "x"))
        .await;
    assert_malformed_filter(&rejected, "body' OR 1=1 --");
}

#[tokio::test]
async fn test_owner_checked_against_principals_table() {
    let (service, db) = test_service().await;
    let type_name = unique_type(&service, &["body"]).await;
    let owner = PrincipalId::now_v7();

    let result = service
        .create_entity(&type_name, NewEntity::default().with_owner(owner))
        .await;
    assert_invalid_owner(&result, owner);

    db.register_principal(owner).await.unwrap();
    let entity = service
        .create_entity(&type_name, NewEntity::default().with_owner(owner))
        .await
        .unwrap();
    assert_eq!(entity.owner_id, Some(owner));
}

#[tokio::test]
async fn test_relations_and_sweep_against_postgres() {
    let (service, _) = test_service().await;
    let type_name = unique_type(&service, &["body"]).await;
    let a = service.create_entity(&type_name, NewEntity::default()).await.unwrap();
    let b = service.create_entity(&type_name, NewEntity::default()).await.unwrap();

    service
        .create_relation(a.id, b.id, "member_of", attrs! { "role" => "admin" })
        .await
        .unwrap();
    let merged = service
        .create_relation(a.id, b.id, "member_of", attrs! { "since" => 2024i64 })
        .await
        .unwrap();
    assert_eq!(merged.metadata.len(), 2);

    let outgoing = service
        .related_from(a.id, "member_of", Some(&type_name), TenantScope::Unrestricted)
        .await
        .unwrap();
    assert_eq!(outgoing.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b.id]);
    let roster = service.related_to(b.id, "member_of", TenantScope::Unrestricted).await.unwrap();
    assert_eq!(roster[0].entity.id, a.id);
    assert_eq!(roster[0].joined_at, merged.created_at);

    assert!(service.delete_entity(b.id, true).await.unwrap());
    assert!(service.has_relation(a.id, b.id, "member_of").await.unwrap());

    let report = service.sweep(false).await.unwrap();
    assert!(report
        .orphaned_relations
        .iter()
        .any(|k| k.source_id == a.id && k.target_id == b.id));
    assert!(!service.has_relation(a.id, b.id, "member_of").await.unwrap());
}

#[tokio::test]
async fn test_scoped_query_against_postgres() {
    let (service, _) = test_service().await;
    let type_name = unique_type(&service, &["body"]).await;
    let tenant = mosaic_core::ApplicationId::now_v7();

    service.create_entity(&type_name, NewEntity::default()).await.unwrap();
    service
        .create_entity(&type_name, NewEntity::default().with_tenancy(Tenancy::Scoped(tenant)))
        .await
        .unwrap();

    let all = service.query(&type_name, EntityQuery::new()).await.unwrap();
    assert_eq!(all.total, 2);
    let global = service
        .query(&type_name, EntityQuery::new().application(Tenancy::Global))
        .await
        .unwrap();
    assert_eq!(global.total, 1);
    let scoped = service
        .query(&type_name, EntityQuery::new().application(Tenancy::Scoped(tenant)))
        .await
        .unwrap();
    assert_eq!(scoped.total, 1);

    service
        .create_entity(
            &type_name,
            NewEntity::default().with_tenancy(Tenancy::Scoped(mosaic_core::ApplicationId::now_v7())),
        )
        .await
        .unwrap();
    let visible = service
        .query(&type_name, EntityQuery::new().visible_to(Some(tenant)))
        .await
        .unwrap();
    assert_eq!(visible.total, 2);
    let anonymous = service
        .query(&type_name, EntityQuery::new().visible_to(None))
        .await
        .unwrap();
    assert_eq!(anonymous.total, 1);
}

#[tokio::test]
async fn test_traversal_scope_against_postgres() {
    let (service, _) = test_service().await;
    let type_name = unique_type(&service, &["body"]).await;
    let tenant = mosaic_core::ApplicationId::now_v7();

    let hub = service.create_entity(&type_name, NewEntity::default()).await.unwrap();
    let mine = service
        .create_entity(&type_name, NewEntity::default().with_tenancy(Tenancy::Scoped(tenant)))
        .await
        .unwrap();
    let theirs = service
        .create_entity(
            &type_name,
            NewEntity::default().with_tenancy(Tenancy::Scoped(mosaic_core::ApplicationId::now_v7())),
        )
        .await
        .unwrap();
    for member in [mine.id, theirs.id] {
        service
            .create_relation(member, hub.id, "member", Attributes::new())
            .await
            .unwrap();
        service
            .create_relation(hub.id, member, "pinned", Attributes::new())
            .await
            .unwrap();
    }

    let scope = TenantScope::VisibleTo(Some(tenant));
    let roster = service.related_to(hub.id, "member", scope).await.unwrap();
    assert_eq!(roster.iter().map(|r| r.entity.id).collect::<Vec<_>>(), vec![mine.id]);
    let pinned = service.related_from(hub.id, "pinned", None, scope).await.unwrap();
    assert_eq!(pinned.iter().map(|e| e.id).collect::<Vec<_>>(), vec![mine.id]);
    assert!(service
        .related_to(hub.id, "member", TenantScope::VisibleTo(None))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_search_and_unsigned_values_against_postgres() {
    let (service, _) = test_service().await;
    let type_name = unique_type(&service, &["body", "rank"]).await;
    let entity = service
        .create_entity(&type_name, NewEntity::new(attrs! { "body" => "hello", "rank" => u64::MAX }))
        .await
        .unwrap();

    let fetched = service.get_entity(entity.id).await.unwrap().unwrap();
    assert_eq!(fetched.attributes.get("rank"), Some(&mosaic_core::AttrValue::UInt(u64::MAX)));
    let exact = service
        .query(&type_name, EntityQuery::new().filter("rank", u64::MAX))
        .await
        .unwrap();
    assert_eq!(exact.total, 1);

    for (needle, hits) in [("ELL", 1), ("body", 0), ("\"body\": \"hello", 0), ("\"body\":\"hello", 0)] {
        let found = service
            .search(&type_name, needle, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), hits, "{}", needle);
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Attributes written to Postgres come back unchanged, and two
    /// successive updates merge rather than replace.
    #[test]
    fn prop_create_get_update_roundtrip(
        attributes in arb_attributes(),
        first in arb_attributes(),
        second in arb_attributes(),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (service, _) = test_service().await;
            let type_name = unique_type(&service, &[]).await;

            let created = service
                .create_entity(&type_name, NewEntity::new(attributes.clone()))
                .await
                .unwrap();
            let fetched = service.get_entity(created.id).await.unwrap().unwrap();
            assert_attributes_json_eq(&fetched.attributes, &attributes);

            service.update_entity(created.id, EntityPatch::attributes(first.clone())).await.unwrap();
            let updated = service
                .update_entity(created.id, EntityPatch::attributes(second.clone()))
                .await
                .unwrap()
                .unwrap();

            let expected: Attributes = attributes.merged(first).merged(second);
            assert_attributes_json_eq(&updated.attributes, &expected);

            assert!(service.delete_entity(created.id, false).await.unwrap());
            let hidden = service.query(&type_name, EntityQuery::new()).await.unwrap();
            assert_eq!(hidden.total, 0);
            let deleted = service
                .query(&type_name, EntityQuery::new().status(Status::deleted()))
                .await
                .unwrap();
            assert_eq!(deleted.total, 1);
        });
    }
}
