//! Per-collection locks serializing fixtures that use the same collection name

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

static GLOBAL: Lazy<Arc<CollectionLocks>> = Lazy::new(|| Arc::new(CollectionLocks::new()));

/// Registry of collection-name locks.
///
/// An entry exists while some fixture holds or awaits the lock for that name.
/// The registry mutex is only held to look up, insert or remove entries, never
/// while waiting for a collection lock.
#[derive(Default)]
pub struct CollectionLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by all fixtures
    pub fn global() -> Arc<CollectionLocks> {
        Arc::clone(&GLOBAL)
    }

    /// Lock `name`, waiting for any other holder to unlock it first
    pub async fn lock(self: &Arc<Self>, name: &str) -> CollectionLock {
        let mutex = {
            let mut entries = self.entries.lock();
            Arc::clone(
                entries
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = mutex.lock_owned().await;
        debug!(collection = name, "Locked collection");
        CollectionLock {
            name: name.to_string(),
            guard: Some(guard),
            registry: Arc::clone(self),
        }
    }

    /// Whether `name` is currently held or awaited by a fixture
    pub fn is_locked(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn unlock(&self, name: &str, guard: OwnedMutexGuard<()>) {
        let mut entries = self.entries.lock();
        drop(guard);
        // Only the registry's own reference left means nobody is waiting.
        let idle = entries
            .get(name)
            .map(|mutex| Arc::strong_count(mutex) == 1)
            .unwrap_or(false);
        if idle {
            entries.remove(name);
        }
        debug!(collection = name, removed = idle, "Unlocked collection");
    }
}

/// Held lock on one collection name, unlocked on drop
pub struct CollectionLock {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<CollectionLocks>,
}

impl CollectionLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlock and remove the registry entry unless another fixture is waiting
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.registry.unlock(&self.name, guard);
        }
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CollectionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLock").field("name", &self.name).finish()
    }
}
