//! Session capability consumed by the leak tracker and the test fixtures
//!
//! A session is a cheap handle onto a pooled client. Copies share the pool but
//! are closed independently, which is what the leak registry counts.

use async_trait::async_trait;
use bson::Document as BsonDocument;
use webshop_common::Result;

use crate::index::IndexSpec;

/// A pooled session that can be copied and yields named databases
pub trait Session: Send + Sync + Sized + 'static {
    type Database: SessionDatabase<Collection = Self::Collection>;
    type Collection: SessionCollection;

    /// Create an independent copy sharing the underlying pool
    fn copy(&self) -> Self;

    /// Select a database by name
    fn database(&self, name: &str) -> Self::Database;

    /// Select the database named by the session's connection string
    fn default_database(&self) -> Self::Database;

    /// Close this session. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Database selected from a [`Session`]
#[async_trait]
pub trait SessionDatabase: Send + Sync {
    type Collection: SessionCollection;

    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Self::Collection;

    /// Drop the database and everything in it
    async fn drop_database(&self) -> Result<()>;
}

/// Collection selected from a [`SessionDatabase`]
#[async_trait]
pub trait SessionCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the database owning this collection
    fn database_name(&self) -> &str;

    /// Create the index unless an equivalent one already exists
    async fn ensure_index(&self, index: &IndexSpec) -> Result<()>;

    async fn insert(&self, document: BsonDocument) -> Result<()>;

    async fn find_one(&self, filter: BsonDocument) -> Result<Option<BsonDocument>>;
}

/// Opens sessions scoped to a named database
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn open(&self, database: &str) -> Result<Self::Session>;
}
