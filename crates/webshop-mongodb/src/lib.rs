//! MongoDB session handling for webshop
//!
//! This crate wraps the MongoDB driver with leak-tracked handles and provides
//! isolated databases for tests.
//!
//! # Features
//! - Per-name connection leak detection (advisory, never blocking)
//! - Database and collection suppliers over copied sessions
//! - Index management with scoped handle release
//! - Test fixtures with per-collection locking and database teardown
//! - In-memory session for running without a server

pub mod connection;
pub mod index;
pub mod leak;
pub mod memory;
pub mod session;
pub mod supplier;
pub mod testing;

pub use connection::{Connection, MongoConnector, PoolConfig};
pub use index::{CollectionIndex, CollectionIndices, IndexSpec};
pub use leak::{LeakDetected, LeakRegistry, DB_KEY, DEFAULT_MAX_LEAK_CONNECTIONS};
pub use memory::{MemorySession, MemoryStore};
pub use session::{Connector, Session, SessionCollection, SessionDatabase};
pub use supplier::{CollectionHandle, CollectionSupplier, DbHandle, DbSupplier, ResourceHandle, Supplied};
pub use webshop_common::{Result, WebshopError};
