//! Isolated test databases.
//!
//! [`setup_db`] opens a database named after the running test, locks every
//! requested collection name against other fixtures and hands out leak-tracked
//! collection handles. [`release_db`] gives everything back and drops the
//! database.
//!
//! If setup does not complete (an error, or the setup future is dropped while
//! waiting on a lock), every lock and handle taken so far is released on drop
//! and the caller has nothing to release.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use webshop_common::{Result, WebshopError};

use super::locks::{CollectionLock, CollectionLocks};
use super::test_name::resolve_test_name;
use crate::leak::{LeakDetected, LeakRegistry};
use crate::session::{Connector, Session, SessionCollection, SessionDatabase};
use crate::supplier::{CollectionHandle, CollectionSupplier};

/// A collection requested from a fixture.
///
/// Clones share the same slot, so a clone kept by the test sees the supplier
/// the fixture binds during setup.
pub struct NamedCollection<S: Session> {
    name: String,
    slot: Arc<Mutex<Option<CollectionSupplier<S>>>>,
}

impl<S: Session> NamedCollection<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supplier bound by the last setup using this collection
    pub fn supplier(&self) -> Option<CollectionSupplier<S>> {
        self.slot.lock().clone()
    }

    fn bind(&self, supplier: CollectionSupplier<S>) {
        *self.slot.lock() = Some(supplier);
    }
}

impl<S: Session> Clone for NamedCollection<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<S: Session> fmt::Debug for NamedCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCollection")
            .field("name", &self.name)
            .field("bound", &self.slot.lock().is_some())
            .finish()
    }
}

/// Build one [`NamedCollection`] per name
pub fn named_collections<S: Session>(names: &[&str]) -> Vec<NamedCollection<S>> {
    names.iter().map(|name| NamedCollection::new(*name)).collect()
}

/// Result of a drop attempt on one fixture database
#[derive(Debug, Clone)]
pub struct DropFailure {
    pub database: String,
    pub error: WebshopError,
}

/// Outcome of [`TestDb::release`]
#[derive(Debug, Clone, Default)]
pub struct ReleaseReport {
    pub released: Vec<String>,
    pub failed: Vec<DropFailure>,
}

impl ReleaseReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn released_messages(&self) -> Vec<String> {
        self.released
            .iter()
            .map(|name| format!("DB {}. Successfully released", name))
            .collect()
    }

    pub fn failed_messages(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|f| format!("DB {}. Failed to release. Error: {}", f.database, f.error))
            .collect()
    }

    /// Fail with every drop error joined into one [`WebshopError::DatabaseDrop`]
    pub fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        Err(WebshopError::DatabaseDrop(self.failed_messages().join("; ")))
    }
}

/// Allocates fixtures against a leak registry and a lock registry
pub struct Fixtures {
    registry: Arc<LeakRegistry>,
    locks: Arc<CollectionLocks>,
}

impl Fixtures {
    pub fn new(registry: Arc<LeakRegistry>, locks: Arc<CollectionLocks>) -> Self {
        Self { registry, locks }
    }

    /// Fixtures backed by the process-wide registries
    pub fn global() -> Self {
        Self::new(LeakRegistry::global(), CollectionLocks::global())
    }

    pub fn registry(&self) -> &Arc<LeakRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<CollectionLocks> {
        &self.locks
    }

    /// Set up a database named after the running test
    pub async fn setup<C: Connector>(
        &self,
        connector: &C,
        collections: &[NamedCollection<C::Session>],
    ) -> Result<TestDb<C::Session>> {
        let name = resolve_test_name()?;
        self.setup_named(connector, &name, collections).await
    }

    /// Set up a database with an explicit name
    pub async fn setup_named<C: Connector>(
        &self,
        connector: &C,
        database: &str,
        collections: &[NamedCollection<C::Session>],
    ) -> Result<TestDb<C::Session>> {
        let mut names = BTreeSet::new();
        for collection in collections {
            if !names.insert(collection.name()) {
                return Err(WebshopError::Fixture(format!(
                    "collection {} requested twice",
                    collection.name()
                )));
            }
        }

        let session = Arc::new(connector.open(database).await?);
        let mut db = TestDb {
            name: database.to_string(),
            session: Arc::clone(&session),
            collections: HashMap::new(),
            locks: HashMap::new(),
            leaks: Vec::new(),
            released: false,
        };

        // Locks are always taken in name order, whatever order the caller lists
        for name in names {
            let lock = self.locks.lock(name).await;
            db.locks.insert(name.to_string(), lock);
        }

        for collection in collections {
            let supplier = CollectionSupplier::new(Arc::clone(&session), collection.name())
                .in_database(database)
                .with_registry(Arc::clone(&self.registry));
            collection.bind(supplier.clone());

            let (handle, leak) = supplier.supply().into_parts();
            if let Some(leak) = leak {
                db.leaks.push(leak);
            }
            db.collections.insert(collection.name().to_string(), handle);
        }

        info!(
            database,
            collections = collections.len(),
            "Test database ready"
        );
        Ok(db)
    }
}

/// Set up a database named after the running test, using the process-wide registries
pub async fn setup_db<C: Connector>(
    connector: &C,
    collections: &[NamedCollection<C::Session>],
) -> Result<TestDb<C::Session>> {
    Fixtures::global().setup(connector, collections).await
}

/// Set up a database with an explicit name, using the process-wide registries
pub async fn setup_named_db<C: Connector>(
    connector: &C,
    database: &str,
    collections: &[NamedCollection<C::Session>],
) -> Result<TestDb<C::Session>> {
    Fixtures::global()
        .setup_named(connector, database, collections)
        .await
}

/// Release a fixture, logging the outcome of every database drop
pub async fn release_db<S: Session>(db: TestDb<S>) -> ReleaseReport {
    let report = db.release().await;
    for message in report.released_messages() {
        info!("{}", message);
    }
    for message in report.failed_messages() {
        error!("{}", message);
    }
    report
}

/// An isolated database with locked collections for one test
pub struct TestDb<S: Session> {
    name: String,
    session: Arc<S>,
    collections: HashMap<String, CollectionHandle<S>>,
    locks: HashMap<String, CollectionLock>,
    leaks: Vec<LeakDetected>,
    released: bool,
}

impl<S: Session> TestDb<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session shared by every collection of the fixture
    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Handle acquired for `name` during setup
    pub fn collection(&self, name: &str) -> Option<&CollectionHandle<S>> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> &HashMap<String, CollectionHandle<S>> {
        &self.collections
    }

    /// Leaks flagged while acquiring the setup handles
    pub fn leaks(&self) -> &[LeakDetected] {
        &self.leaks
    }

    /// Release every handle and lock, drop the databases the handles lived in
    /// and close the shared session.
    ///
    /// Every database is attempted even when an earlier drop fails.
    pub async fn release(mut self) -> ReleaseReport {
        self.released = true;

        let mut databases = BTreeSet::new();
        for (name, mut handle) in self.collections.drain() {
            handle.release();
            databases.insert(handle.database_name().to_string());
            if let Some(lock) = self.locks.remove(&name) {
                lock.unlock();
            }
        }
        for (_, lock) in self.locks.drain() {
            lock.unlock();
        }
        if databases.is_empty() {
            databases.insert(self.name.clone());
        }

        let mut report = ReleaseReport::default();
        for database in databases {
            match self.session.database(&database).drop_database().await {
                Ok(()) => report.released.push(database),
                Err(error) => report.failed.push(DropFailure { database, error }),
            }
        }

        self.session.close();
        report
    }
}

impl<S: Session> Drop for TestDb<S> {
    fn drop(&mut self) {
        if !self.released {
            warn!(database = %self.name, "TestDb dropped without release, database left in place");
            self.session.close();
        }
    }
}

impl<S: Session> fmt::Debug for TestDb<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.collections.keys().collect();
        names.sort();
        f.debug_struct("TestDb")
            .field("name", &self.name)
            .field("collections", &names)
            .field("released", &self.released)
            .finish()
    }
}
