#![cfg(feature = "db")]

//! Variant overlay against PostgreSQL.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/grid_variant_store \
//!     cargo test --features db --test pg_store -- --ignored
//! ```

use std::sync::Arc;

use grid_variant_store::config::{StoreConfig, StoreKind};
use grid_variant_store::domain::{ResourceType, TapChangerStep, TapChangerStepKey};
use grid_variant_store::repo::pg::PgStore;
use grid_variant_store::{CloneTarget, NetworkStore, OwnerKey, StoreError};
use serde_json::json;
use uuid::Uuid;

async fn pg_store() -> NetworkStore {
    let cfg = StoreConfig {
        backend: StoreKind::Postgres,
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        ..StoreConfig::default()
    };
    let store = PgStore::connect(&cfg).await.unwrap();
    store.ensure_schema().await.unwrap();
    NetworkStore::new(Arc::new(store))
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_pg_load_p0_scenario() {
    let store = pg_store().await;
    let network = Uuid::new_v4();
    let load = OwnerKey::equipment("LOAD", ResourceType::Load);
    store.create_network(network).await.unwrap();
    store.equipments().put(network, 0, &load, &json!({"p0": 600.0})).await.unwrap();

    store
        .clone_variant(network, 0, &CloneTarget::partial(1, "v"))
        .await
        .unwrap();
    store.equipments().put(network, 1, &load, &json!({"p0": 601.0})).await.unwrap();

    let p0 = |v: Option<serde_json::Value>| v.and_then(|v| v["p0"].as_f64());
    assert_eq!(p0(store.equipments().get(network, 0, &load).await.unwrap()), Some(600.0));
    assert_eq!(p0(store.equipments().get(network, 1, &load).await.unwrap()), Some(601.0));

    store.remove_variant(network, 1).await.unwrap();
    assert_eq!(p0(store.equipments().get(network, 0, &load).await.unwrap()), Some(600.0));
    store.delete_network(network).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_pg_tombstones_and_rollback() {
    let store = pg_store().await;
    let network = Uuid::new_v4();
    let key = OwnerKey::new("TWT", ResourceType::TwoWindingsTransformer, TapChangerStepKey::ratio(0));
    let step = TapChangerStep {
        rho: 1.0,
        r: 0.0,
        x: 0.0,
        g: 0.0,
        b: 0.0,
        alpha: None,
    };
    store.create_network(network).await.unwrap();
    store.tap_changer_steps().put(network, 0, &key, &step).await.unwrap();
    store
        .clone_variant(network, 0, &CloneTarget::partial(1, "v1"))
        .await
        .unwrap();

    store.tap_changer_steps().tombstone(network, 1, &key).await.unwrap();
    assert_eq!(store.tap_changer_steps().get(network, 1, &key).await.unwrap(), None);
    assert_eq!(store.tombstoned_attribute_keys(network, 1).await.unwrap().len(), 1);

    // A failed clone leaves nothing behind.
    let err = store
        .clone_variant(network, 1, &CloneTarget::partial(2, "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateVariantName { .. }));
    assert_eq!(store.variants(network).await.unwrap().len(), 2);

    store.delete_network(network).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_pg_concurrent_clones_to_one_number() {
    let store = pg_store().await;
    let network = Uuid::new_v4();
    store.create_network(network).await.unwrap();

    let first = CloneTarget::partial(1, "first");
    let second = CloneTarget::partial(1, "second");
    let (a, b) = tokio::join!(
        store.clone_variant(network, 0, &first),
        store.clone_variant(network, 0, &second),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(StoreError::DuplicateVariant { variant_num: 1, .. }))));

    let err = store.create_network(network).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateNetwork { .. }));
    store.delete_network(network).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_pg_put_racing_removal_leaves_no_rows() {
    let store = pg_store().await;
    let network = Uuid::new_v4();
    let load = OwnerKey::equipment("LOAD", ResourceType::Load);
    store.create_network(network).await.unwrap();
    store
        .clone_variant(network, 0, &CloneTarget::partial(1, "v1"))
        .await
        .unwrap();

    let equipments = store.equipments();
    let value = json!({"p0": 601.0});
    let (put, removed) = tokio::join!(
        equipments.put(network, 1, &load, &value),
        store.remove_variant(network, 1),
    );
    removed.unwrap();
    if let Err(err) = put {
        assert!(err.is_not_found());
    }

    store
        .clone_variant(network, 0, &CloneTarget::partial(1, "v1"))
        .await
        .unwrap();
    assert_eq!(store.equipments().get_local(network, 1, &load).await.unwrap(), None);
    store.delete_network(network).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_pg_baseline_write_keeps_overlay() {
    let store = pg_store().await;
    let network = Uuid::new_v4();
    let load = OwnerKey::equipment("LOAD", ResourceType::Load);
    store.create_network(network).await.unwrap();
    store.equipments().put(network, 0, &load, &json!({"p0": 600.0})).await.unwrap();
    store
        .clone_variant(network, 0, &CloneTarget::partial(1, "v1"))
        .await
        .unwrap();

    store.equipments().put(network, 0, &load, &json!({"p0": 999.0})).await.unwrap();
    let p0 = |v: Option<serde_json::Value>| v.and_then(|v| v["p0"].as_f64());
    assert_eq!(p0(store.equipments().get(network, 1, &load).await.unwrap()), Some(600.0));

    store.equipments().tombstone(network, 0, &load).await.unwrap();
    assert_eq!(p0(store.equipments().get(network, 1, &load).await.unwrap()), Some(600.0));
    store.delete_network(network).await.unwrap();
}
