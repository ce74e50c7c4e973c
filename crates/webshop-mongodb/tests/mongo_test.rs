//! Integration tests against a live MongoDB.
//!
//! These tests require a MongoDB server to be running.
//! Set WEBSHOP_TEST_MONGO_URL (default mongodb://localhost), then:
//! cargo test -p webshop-mongodb -- --ignored

use bson::doc;
use std::sync::Arc;
use webshop_mongodb::testing::{named_collections, release_db, setup_db, NamedCollection};
use webshop_mongodb::{
    CollectionIndex, CollectionSupplier, Connection, Connector, DbSupplier, IndexSpec,
    LeakRegistry, MongoConnector, SessionCollection, SessionDatabase, DB_KEY,
};

async fn session(database: &str) -> Arc<Connection> {
    let connector = MongoConnector::from_env();
    Arc::new(
        connector
            .open(database)
            .await
            .unwrap_or_else(|e| panic!("Connect to {}: {}", connector.base_uri, e)),
    )
}

#[tokio::test]
#[ignore] // Only run with --ignored flag when database is available
async fn test_db_supplier_leak_connections() {
    let registry = Arc::new(LeakRegistry::new());
    let supplier = DbSupplier::new(session("webshop_leak_db").await).with_registry(Arc::clone(&registry));

    let first = supplier.supply();
    assert!(!first.is_leak(), "No errors expected");
    let mut db = first.into_inner();
    assert_eq!(db.name(), "webshop_leak_db");
    assert_eq!(registry.count(DB_KEY), 1);

    let second = supplier.supply();
    assert!(second.is_leak(), "Leak expected with two session copies");
    assert_eq!(registry.count(DB_KEY), 1);
    drop(second);

    db.release();
    assert_eq!(registry.count(DB_KEY), 0);
    db.release();
    assert_eq!(registry.count(DB_KEY), 0);
}

#[tokio::test]
#[ignore]
async fn test_collection_supplier_leak_connections() {
    let registry = Arc::new(LeakRegistry::new());
    let supplier = CollectionSupplier::new(session("webshop_leak_collection").await, "c1")
        .with_registry(Arc::clone(&registry));

    let mut c = supplier.supply().strict().unwrap();
    assert_eq!(registry.count("c1"), 1);
    let flagged = supplier.supply();
    assert!(flagged.is_leak());
    assert_eq!(registry.count("c1"), 1);
    drop(flagged);
    assert_eq!(registry.count("c1"), 0);

    c.release();
    assert_eq!(registry.count("c1"), 0);
    c.release();
    assert_eq!(registry.count("c1"), 0);
}

#[tokio::test]
#[ignore]
async fn test_setup_and_release_db() {
    let names = ["a", "b", "c", "d", "e", "f"];
    let specs: Vec<NamedCollection<Connection>> = named_collections(&names);
    let connector = MongoConnector::from_env();

    let db = setup_db(&connector, &specs).await.unwrap();
    for name in names {
        let collection = db.collection(name).unwrap();
        collection.insert(doc! { "key": "k1", "value": "v1" }).await.unwrap();
        collection.insert(doc! { "key": "k2", "value": "v2" }).await.unwrap();

        let found = collection.find_one(doc! { "key": "k2" }).await.unwrap().unwrap();
        assert_eq!(found.get_str("value").unwrap(), "v2");
    }

    let index = CollectionIndex::new(
        specs[0].supplier().unwrap(),
        IndexSpec::new(["key"]).unique(true),
    );
    index.ensure_index().await.unwrap();

    let database = db.name().to_string();
    let report = release_db(db).await;
    assert!(report.is_ok(), "{:?}", report.failed_messages());

    let check = session("admin").await;
    let names = check.list_database_names().await.unwrap();
    assert!(!names.contains(&database));
}
