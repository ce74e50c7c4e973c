//! Product store against an isolated fixture database.

use bson::doc;
use std::sync::Arc;
use webshop_mongodb::testing::{release_db, CollectionLocks, Fixtures, NamedCollection};
use webshop_mongodb::{LeakRegistry, MemorySession, MemoryStore, SessionCollection};
use webshopd::{Product, ProductStore, PRODUCTS_COLLECTION};

#[tokio::test]
async fn test_product_indices_in_fixture() {
    let store = MemoryStore::new();
    let fixtures = Fixtures::new(Arc::new(LeakRegistry::new()), Arc::new(CollectionLocks::new()));
    let products: NamedCollection<MemorySession> = NamedCollection::new(PRODUCTS_COLLECTION);

    let db = fixtures
        .setup_named(&store, "webshopd_products", std::slice::from_ref(&products))
        .await
        .unwrap();

    let product_store = ProductStore::from_supplier(products.supplier().unwrap());
    product_store.indices().ensure_all().await.unwrap();

    let collection = db.collection(PRODUCTS_COLLECTION).unwrap();
    let lamp = Product {
        name: "lamp".to_string(),
        desc: "desk lamp".to_string(),
    };
    collection.insert(bson::to_document(&lamp).unwrap()).await.unwrap();
    assert!(collection
        .insert(doc! { "name": "lamp", "desc": "another lamp" })
        .await
        .is_err());

    let found = collection.find_one(doc! { "name": "lamp" }).await.unwrap().unwrap();
    assert_eq!(bson::from_document::<Product>(found).unwrap(), lamp);

    assert!(release_db(db).await.is_ok());
    assert!(store.database_names().is_empty());
}
