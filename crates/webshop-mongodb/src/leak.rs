//! Connection leak detection
//!
//! Counts the concurrently open handles per resource name (a collection name,
//! or [`DB_KEY`] for database handles). An acquire that would push a counter to
//! the threshold is reported as a leak but never refused; the registry is a
//! diagnostic signal, not admission control.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use webshop_common::WebshopError;

/// Resource name under which database handles are counted
pub const DB_KEY: &str = "_db";

/// Default maximum number of tracked handles per resource name
pub const DEFAULT_MAX_LEAK_CONNECTIONS: u64 = 2;

static GLOBAL: Lazy<Arc<LeakRegistry>> = Lazy::new(|| Arc::new(LeakRegistry::new()));

/// Raised when an acquire exceeds the per-name threshold
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connection leak on {name}: {open} handle(s) already open, threshold {threshold}")]
pub struct LeakDetected {
    pub name: String,
    pub open: u64,
    pub threshold: u64,
}

impl From<LeakDetected> for WebshopError {
    fn from(err: LeakDetected) -> Self {
        WebshopError::ConnectionLeak(err.to_string())
    }
}

/// Per-name counters of open handles
pub struct LeakRegistry {
    counters: Mutex<HashMap<String, u64>>,
    threshold: AtomicU64,
}

impl LeakRegistry {
    /// Create an empty registry with the default threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_MAX_LEAK_CONNECTIONS)
    }

    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            threshold: AtomicU64::new(threshold),
        }
    }

    /// Process-wide registry, empty until first use
    pub fn global() -> Arc<LeakRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    /// Count a new handle for `name`.
    ///
    /// The counter is incremented only while the incremented value stays below
    /// the threshold; otherwise it is left untouched and [`LeakDetected`] is
    /// returned. With the default threshold of 2 a single handle per name is
    /// counted and every further concurrent acquire is flagged.
    pub fn acquire(&self, name: &str) -> Result<(), LeakDetected> {
        let threshold = self.threshold();
        let mut counters = self.counters.lock();
        let counter = counters.entry(name.to_string()).or_insert(0);

        if *counter + 1 < threshold {
            *counter += 1;
            debug!(resource = name, open = *counter, "Acquired handle");
            Ok(())
        } else {
            Err(LeakDetected {
                name: name.to_string(),
                open: *counter,
                threshold,
            })
        }
    }

    /// Uncount a handle for `name`. Releasing at zero is a no-op.
    pub fn release(&self, name: &str) {
        let mut counters = self.counters.lock();
        if let Some(counter) = counters.get_mut(name) {
            if *counter > 0 {
                *counter -= 1;
                debug!(resource = name, open = *counter, "Released handle");
            }
        }
    }

    /// Number of counted handles currently open for `name`
    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Resource names with at least one open handle, sorted by name
    pub fn open_handles(&self) -> Vec<(String, u64)> {
        let counters = self.counters.lock();
        let mut open: Vec<(String, u64)> = counters
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        open.sort();
        open
    }
}

impl Default for LeakRegistry {
    fn default() -> Self {
        Self::new()
    }
}
