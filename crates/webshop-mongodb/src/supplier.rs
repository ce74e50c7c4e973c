//! Leak-tracked suppliers of database and collection handles
//!
//! Every supplied handle owns its own copy of the session. Dropping or
//! releasing the handle closes that copy and gives its slot back to the
//! [`LeakRegistry`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::warn;
use webshop_common::Result;

use crate::leak::{LeakDetected, LeakRegistry, DB_KEY};
use crate::session::{Session, SessionDatabase};

/// A supplied handle together with the leak condition raised while acquiring it.
///
/// The handle is always usable; `leak` only reports that the concurrency budget
/// for its resource name was exceeded.
#[must_use = "dropping the supplied handle releases it immediately"]
pub struct Supplied<T> {
    pub handle: T,
    pub leak: Option<LeakDetected>,
}

impl<T> Supplied<T> {
    pub fn is_leak(&self) -> bool {
        self.leak.is_some()
    }

    /// Take the handle, ignoring any leak condition
    pub fn into_inner(self) -> T {
        self.handle
    }

    pub fn into_parts(self) -> (T, Option<LeakDetected>) {
        (self.handle, self.leak)
    }

    /// Treat a leak as a hard failure. The handle is released on error.
    pub fn strict(self) -> Result<T> {
        match self.leak {
            None => Ok(self.handle),
            Some(leak) => Err(leak.into()),
        }
    }
}

/// Handle over one copied session, scoped to a database or collection
pub struct ResourceHandle<S: Session, T> {
    resource: T,
    session: S,
    key: String,
    registry: Arc<LeakRegistry>,
    released: bool,
}

/// Handle to the session's default database
pub type DbHandle<S> = ResourceHandle<S, <S as Session>::Database>;

/// Handle to a single collection
pub type CollectionHandle<S> = ResourceHandle<S, <S as Session>::Collection>;

impl<S: Session, T> ResourceHandle<S, T> {
    /// Resource name this handle is counted under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The session copy owned by this handle
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the handle's name in the registry and close its session copy.
    ///
    /// Every handle releases its name once, including handles flagged as a
    /// leak; the registry clamps at zero. Calling this again is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.registry.release(&self.key);
        self.session.close();
    }
}

impl<S: Session, T> Deref for ResourceHandle<S, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<S: Session, T> DerefMut for ResourceHandle<S, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<S: Session, T> Drop for ResourceHandle<S, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: Session, T> fmt::Debug for ResourceHandle<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

fn supply<S: Session, T>(
    registry: &Arc<LeakRegistry>,
    key: &str,
    session: S,
    resource: T,
    leak: Option<LeakDetected>,
) -> Supplied<ResourceHandle<S, T>> {
    Supplied {
        handle: ResourceHandle {
            resource,
            session,
            key: key.to_string(),
            registry: Arc::clone(registry),
            released: false,
        },
        leak,
    }
}

fn acquire(registry: &LeakRegistry, key: &str) -> Option<LeakDetected> {
    let leak = registry.acquire(key).err();
    if let Some(ref leak) = leak {
        warn!(resource = key, open = leak.open, threshold = leak.threshold, "Connection leak detected");
    }
    leak
}

/// Supplies handles to the session's default database, counted under [`DB_KEY`]
pub struct DbSupplier<S: Session> {
    session: Arc<S>,
    registry: Arc<LeakRegistry>,
}

impl<S: Session> DbSupplier<S> {
    /// Create a supplier tracked by the process-wide registry
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            registry: LeakRegistry::global(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<LeakRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Copy the session and hand out its default database
    pub fn supply(&self) -> Supplied<DbHandle<S>> {
        let leak = acquire(&self.registry, DB_KEY);
        let session = self.session.copy();
        let database = session.default_database();
        supply(&self.registry, DB_KEY, session, database, leak)
    }
}

impl<S: Session> Clone for DbSupplier<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Supplies handles to one named collection, counted under the collection name
pub struct CollectionSupplier<S: Session> {
    session: Arc<S>,
    database: Option<String>,
    collection: String,
    registry: Arc<LeakRegistry>,
}

impl<S: Session> CollectionSupplier<S> {
    /// Create a supplier for `collection` in the session's default database,
    /// tracked by the process-wide registry
    pub fn new(session: Arc<S>, collection: impl Into<String>) -> Self {
        Self {
            session,
            database: None,
            collection: collection.into(),
            registry: LeakRegistry::global(),
        }
    }

    /// Bind the supplier to an explicit database
    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_registry(mut self, registry: Arc<LeakRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn registry(&self) -> &Arc<LeakRegistry> {
        &self.registry
    }

    /// Copy the session and hand out the collection
    pub fn supply(&self) -> Supplied<CollectionHandle<S>> {
        let leak = acquire(&self.registry, &self.collection);
        let session = self.session.copy();
        let database = match &self.database {
            Some(name) => session.database(name),
            None => session.default_database(),
        };
        let collection = database.collection(&self.collection);
        supply(&self.registry, &self.collection, session, collection, leak)
    }
}

impl<S: Session> Clone for CollectionSupplier<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            database: self.database.clone(),
            collection: self.collection.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: Session> fmt::Debug for CollectionSupplier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSupplier")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::session::SessionCollection;

    fn session() -> (Arc<MemoryStore>, Arc<crate::memory::MemorySession>) {
        let store = MemoryStore::new();
        let session = Arc::new(store.session("shop"));
        (store, session)
    }

    #[test]
    fn test_db_supplier_leak_connections() {
        let (_store, session) = session();
        let registry = Arc::new(LeakRegistry::new());
        let supplier = DbSupplier::new(session).with_registry(Arc::clone(&registry));

        // First copy: no leak expected
        let first = supplier.supply();
        assert!(!first.is_leak());
        let mut db = first.into_inner();
        assert_eq!(db.name(), "shop");
        assert_eq!(registry.count(DB_KEY), 1);

        // Second concurrent copy: leak flagged, handle still supplied
        let second = supplier.supply();
        assert!(second.is_leak());
        assert_eq!(second.handle.name(), "shop");
        assert_eq!(registry.count(DB_KEY), 1);

        db.release();
        assert_eq!(registry.count(DB_KEY), 0);

        // Releasing again does not go below zero
        db.release();
        drop(second);
        assert_eq!(registry.count(DB_KEY), 0);
    }

    #[test]
    fn test_flagged_handle_release_frees_name() {
        let (_store, session) = session();
        let registry = Arc::new(LeakRegistry::new());
        let supplier = CollectionSupplier::new(session, "c1").with_registry(Arc::clone(&registry));

        let _a = supplier.supply().strict().unwrap();
        let flagged = supplier.supply();
        assert!(flagged.is_leak());
        let mut b = flagged.into_inner();
        assert_eq!(registry.count("c1"), 1);

        b.release();
        assert_eq!(registry.count("c1"), 0);
        b.release();
        assert_eq!(registry.count("c1"), 0);

        let next = supplier.supply();
        assert!(!next.is_leak());
        assert_eq!(registry.count("c1"), 1);
    }

    #[test]
    fn test_collection_supplier_leak_connections() {
        let (_store, session) = session();
        let registry = Arc::new(LeakRegistry::new());
        let supplier = CollectionSupplier::new(session, "c1").with_registry(Arc::clone(&registry));

        let mut c = supplier.supply().strict().unwrap();
        assert_eq!(c.name(), "c1");
        assert_eq!(c.database_name(), "shop");
        assert_eq!(registry.count("c1"), 1);

        let flagged = supplier.supply();
        assert!(flagged.is_leak());
        assert_eq!(registry.count("c1"), 1);
        // strict() drops the flagged handle, which releases the name
        assert!(matches!(
            flagged.strict(),
            Err(webshop_common::WebshopError::ConnectionLeak(_))
        ));
        assert_eq!(registry.count("c1"), 0);

        c.release();
        assert_eq!(registry.count("c1"), 0);
        c.release();
        assert_eq!(registry.count("c1"), 0);
        assert!(supplier.supply().strict().is_ok());
        assert_eq!(registry.count("c1"), 0);
    }

    #[test]
    fn test_each_handle_owns_a_session_copy() {
        let (store, session) = session();
        let supplier = CollectionSupplier::new(session, "c1")
            .with_registry(Arc::new(LeakRegistry::with_threshold(10)));

        let mut a = supplier.supply().into_inner();
        let b = supplier.supply().into_inner();
        assert_eq!(store.open_sessions(), 3);

        a.release();
        assert!(a.session().is_closed());
        assert!(!b.session().is_closed());
        assert_eq!(store.open_sessions(), 2);

        drop(b);
        assert_eq!(store.open_sessions(), 1);
    }

    #[test]
    fn test_drop_releases_handle() {
        let (_store, session) = session();
        let registry = Arc::new(LeakRegistry::new());
        let supplier = CollectionSupplier::new(session, "c1").with_registry(Arc::clone(&registry));

        {
            let _c = supplier.supply().into_inner();
            assert_eq!(registry.count("c1"), 1);
        }
        assert_eq!(registry.count("c1"), 0);
    }

    #[test]
    fn test_explicit_database_binding() {
        let (_store, session) = session();
        let supplier = CollectionSupplier::new(session, "orders")
            .in_database("other")
            .with_registry(Arc::new(LeakRegistry::new()));

        let c = supplier.supply().into_inner();
        assert_eq!(c.database_name(), "other");
        assert_eq!(c.key(), "orders");
    }

    #[tokio::test]
    async fn test_released_handle_rejects_operations() {
        let (_store, session) = session();
        let supplier = CollectionSupplier::new(session, "c1")
            .with_registry(Arc::new(LeakRegistry::new()));

        let mut c = supplier.supply().into_inner();
        c.release();
        let result = c.insert(bson::doc! { "key": "k1" }).await;
        assert!(matches!(
            result,
            Err(webshop_common::WebshopError::Connection(_))
        ));
    }
}
