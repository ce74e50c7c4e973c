//! In-process session backed by a shared map of databases.
//!
//! Used to exercise suppliers and fixtures without a running server. Filters
//! match on top-level field equality only.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use webshop_common::{Result, WebshopError};

use crate::index::IndexSpec;
use crate::session::{Connector, Session, SessionCollection, SessionDatabase};

#[derive(Default)]
struct CollectionData {
    documents: Vec<BsonDocument>,
    indexes: Vec<IndexSpec>,
}

type Databases = HashMap<String, HashMap<String, CollectionData>>;

/// Shared in-memory store that hands out [`MemorySession`]s
#[derive(Default)]
pub struct MemoryStore {
    databases: Mutex<Databases>,
    open_sessions: AtomicUsize,
    failing_drops: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a root session whose default database is `database`
    pub fn session(self: &Arc<Self>, database: &str) -> MemorySession {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            store: Arc::clone(self),
            default_database: database.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sessions opened or copied and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.databases.lock().contains_key(name)
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn collection_names(&self, database: &str) -> Vec<String> {
        let databases = self.databases.lock();
        let mut names: Vec<String> = databases
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn indexes(&self, database: &str, collection: &str) -> Vec<IndexSpec> {
        self.databases
            .lock()
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|data| data.indexes.clone())
            .unwrap_or_default()
    }

    /// Make every future drop of `database` fail
    pub fn fail_drop(&self, database: &str) {
        self.failing_drops.lock().insert(database.to_string());
    }

    fn with_collection<T>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(&mut CollectionData) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.databases.lock();
        let data = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        f(data)
    }
}

#[async_trait]
impl Connector for Arc<MemoryStore> {
    type Session = MemorySession;

    async fn open(&self, database: &str) -> Result<MemorySession> {
        Ok(self.session(database))
    }
}

fn ensure_open(closed: &AtomicBool) -> Result<()> {
    if closed.load(Ordering::SeqCst) {
        Err(WebshopError::Connection("session already closed".to_string()))
    } else {
        Ok(())
    }
}

/// Session over a [`MemoryStore`]
pub struct MemorySession {
    store: Arc<MemoryStore>,
    default_database: String,
    closed: Arc<AtomicBool>,
}

impl Session for MemorySession {
    type Database = MemoryDatabase;
    type Collection = MemoryCollection;

    fn copy(&self) -> Self {
        self.store.open_sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            store: Arc::clone(&self.store),
            default_database: self.default_database.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn database(&self, name: &str) -> MemoryDatabase {
        MemoryDatabase {
            store: Arc::clone(&self.store),
            name: name.to_string(),
            closed: Arc::clone(&self.closed),
        }
    }

    fn default_database(&self) -> MemoryDatabase {
        self.database(&self.default_database)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MemoryDatabase {
    store: Arc<MemoryStore>,
    name: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SessionDatabase for MemoryDatabase {
    type Collection = MemoryCollection;

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            store: Arc::clone(&self.store),
            database: self.name.clone(),
            name: name.to_string(),
            closed: Arc::clone(&self.closed),
        }
    }

    async fn drop_database(&self) -> Result<()> {
        ensure_open(&self.closed)?;
        if self.store.failing_drops.lock().contains(&self.name) {
            return Err(WebshopError::MongoDB(format!(
                "not authorized to drop {}",
                self.name
            )));
        }
        self.store.databases.lock().remove(&self.name);
        Ok(())
    }
}

pub struct MemoryCollection {
    store: Arc<MemoryStore>,
    database: String,
    name: String,
    closed: Arc<AtomicBool>,
}

/// Values of the index fields for `document`, or None when a sparse index skips it
fn index_entry(index: &IndexSpec, document: &BsonDocument) -> Option<Vec<Bson>> {
    let values: Vec<Option<&Bson>> = index
        .fields()
        .iter()
        .map(|(field, _)| document.get(*field))
        .collect();
    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|v| v.cloned().unwrap_or(Bson::Null))
            .collect(),
    )
}

fn violates_unique(index: &IndexSpec, existing: &[BsonDocument], document: &BsonDocument) -> bool {
    if !index.unique {
        return false;
    }
    match index_entry(index, document) {
        Some(entry) => existing
            .iter()
            .any(|other| index_entry(index, other).as_ref() == Some(&entry)),
        None => false,
    }
}

fn matches_filter(document: &BsonDocument, filter: &BsonDocument) -> bool {
    filter
        .iter()
        .all(|(field, value)| document.get(field) == Some(value))
}

#[async_trait]
impl SessionCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        ensure_open(&self.closed)?;
        index.validate()?;
        self.store.with_collection(&self.database, &self.name, |data| {
            if let Some(existing) = data
                .indexes
                .iter()
                .find(|i| i.index_name() == index.index_name())
            {
                if existing == index {
                    return Ok(());
                }
                return Err(WebshopError::IndexCreation(format!(
                    "index {} already exists with different options",
                    index.index_name()
                )));
            }
            for (position, document) in data.documents.iter().enumerate() {
                if violates_unique(index, &data.documents[..position], document) {
                    return Err(WebshopError::IndexCreation(format!(
                        "duplicate key in {}.{} for index {}",
                        self.database,
                        self.name,
                        index.index_name()
                    )));
                }
            }
            data.indexes.push(index.clone());
            Ok(())
        })
    }

    async fn insert(&self, mut document: BsonDocument) -> Result<()> {
        ensure_open(&self.closed)?;
        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }
        self.store.with_collection(&self.database, &self.name, |data| {
            let id = document.get("_id");
            if data.documents.iter().any(|d| d.get("_id") == id) {
                return Err(WebshopError::Query(format!(
                    "duplicate _id in {}.{}",
                    self.database, self.name
                )));
            }
            if let Some(index) = data
                .indexes
                .iter()
                .find(|index| violates_unique(index, &data.documents, &document))
            {
                return Err(WebshopError::Query(format!(
                    "duplicate key in {}.{} for index {}",
                    self.database,
                    self.name,
                    index.index_name()
                )));
            }
            data.documents.push(document);
            Ok(())
        })
    }

    async fn find_one(&self, filter: BsonDocument) -> Result<Option<BsonDocument>> {
        ensure_open(&self.closed)?;
        let databases = self.store.databases.lock();
        Ok(databases
            .get(&self.database)
            .and_then(|collections| collections.get(&self.name))
            .and_then(|data| data.documents.iter().find(|d| matches_filter(d, &filter)))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_insert_and_find_by_key() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let products = session.default_database().collection("products");

        products.insert(doc! { "key": "k1", "value": "v1" }).await.unwrap();
        products.insert(doc! { "key": "k2", "value": "v2" }).await.unwrap();

        let found = products.find_one(doc! { "key": "k2" }).await.unwrap().unwrap();
        assert_eq!(found.get_str("value").unwrap(), "v2");
        assert!(found.contains_key("_id"));
        assert!(products.find_one(doc! { "key": "k3" }).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let products = session.default_database().collection("products");

        products
            .ensure_index(&IndexSpec::new(["name"]).unique(true))
            .await
            .unwrap();
        products.insert(doc! { "name": "lamp" }).await.unwrap();
        assert!(products.insert(doc! { "name": "lamp" }).await.is_err());
        assert!(products.insert(doc! { "name": "desk" }).await.is_ok());
    }

    #[tokio::test]
    async fn test_sparse_unique_index_skips_missing_fields() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let users = session.default_database().collection("users");

        users
            .ensure_index(&IndexSpec::new(["email"]).unique(true).sparse(true))
            .await
            .unwrap();
        users.insert(doc! { "name": "a" }).await.unwrap();
        users.insert(doc! { "name": "b" }).await.unwrap();
        assert_eq!(store.indexes("shop", "users").len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_index_options() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let users = session.default_database().collection("users");

        users.ensure_index(&IndexSpec::new(["email"])).await.unwrap();
        let err = users
            .ensure_index(&IndexSpec::new(["email"]).unique(true))
            .await
            .unwrap_err();
        assert!(matches!(err, WebshopError::IndexCreation(_)));
    }

    #[tokio::test]
    async fn test_drop_database() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let db = session.default_database();
        db.collection("c").insert(doc! { "a": 1 }).await.unwrap();
        assert!(store.database_exists("shop"));

        db.drop_database().await.unwrap();
        assert!(!store.database_exists("shop"));
    }

    #[tokio::test]
    async fn test_fail_drop() {
        let store = MemoryStore::new();
        store.fail_drop("shop");
        let session = store.session("shop");
        let db = session.default_database();
        db.collection("c").insert(doc! { "a": 1 }).await.unwrap();

        assert!(db.drop_database().await.is_err());
        assert!(store.database_exists("shop"));
    }

    #[tokio::test]
    async fn test_open_sessions_tracking() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let copy = session.copy();
        assert_eq!(store.open_sessions(), 2);

        copy.close();
        copy.close();
        assert_eq!(store.open_sessions(), 1);
        assert!(copy.is_closed());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let store = MemoryStore::new();
        let session = store.session("shop");
        let collection = session.default_database().collection("c");
        session.close();

        assert!(collection.find_one(doc! {}).await.is_err());
        assert!(session.default_database().drop_database().await.is_err());
    }
}
