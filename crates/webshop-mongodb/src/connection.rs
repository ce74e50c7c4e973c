//! MongoDB connection management with pool configuration and health checking

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use mongodb::{
    options::{Acknowledgment, ClientOptions, ServerApi, ServerApiVersion, WriteConcern},
    Client, Collection, Database,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webshop_common::{Result, WebshopError};

use crate::index::IndexSpec;
use crate::session::{Connector, Session, SessionCollection, SessionDatabase};

/// Database used when the connection string names none
pub const DEFAULT_DATABASE: &str = "test";

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 0)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
    /// Number of servers that must acknowledge a write (default: 1)
    pub write_ack_min: Option<u32>,
    /// Wait for the journal to be synced before acknowledging a write
    pub journal: Option<bool>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(0),
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("webshop".to_string()),
            write_ack_min: Some(1),
            journal: None,
        }
    }
}

impl PoolConfig {
    fn write_concern(&self) -> Option<WriteConcern> {
        if self.write_ack_min.is_none() && self.journal.is_none() {
            return None;
        }
        let mut concern = WriteConcern::default();
        concern.w = self.write_ack_min.map(Acknowledgment::Nodes);
        concern.journal = self.journal;
        Some(concern)
    }
}

/// MongoDB connection manager with pooling support.
///
/// Copies share the client pool and are closed independently.
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Create a new MongoDB connection with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Create a new MongoDB connection with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let client_options = parse_options(connection_string).await?;
        Self::with_options(client_options, config)
    }

    /// Create a connection from already parsed driver options.
    ///
    /// The pool configuration is applied on top of `client_options`.
    pub fn with_options(mut client_options: ClientOptions, config: PoolConfig) -> Result<Self> {
        // Apply pool configuration
        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(concern) = config.write_concern() {
            client_options.write_concern = Some(concern);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)
            .map_err(|e| WebshopError::Connection(e.to_string()))?;

        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        let database_name = database.name().to_string();
        debug!(database = %database_name, "Opened MongoDB connection");

        Ok(Self {
            client,
            database,
            database_name,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a collection by name (returns untyped BsonDocument collection)
    pub fn get_collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        ensure_open(&self.closed)?;
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(WebshopError::Connection(format!("Ping failed: {}", e))),
        }
    }

    /// List all collection names in the current database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        ensure_open(&self.closed)?;
        let names = self.database.list_collection_names().await?;
        Ok(names)
    }

    /// List all database names on the server
    pub async fn list_database_names(&self) -> Result<Vec<String>> {
        ensure_open(&self.closed)?;
        let names = self.client.list_database_names().await?;
        Ok(names)
    }
}

/// Parse a connection string into driver options
pub async fn parse_options(connection_string: &str) -> Result<ClientOptions> {
    ClientOptions::parse(connection_string)
        .await
        .map_err(|e| WebshopError::Connection(format!("{}: {}", connection_string, e)))
}

fn ensure_open(closed: &AtomicBool) -> Result<()> {
    if closed.load(Ordering::SeqCst) {
        Err(WebshopError::Connection("session already closed".to_string()))
    } else {
        Ok(())
    }
}

impl Session for Connection {
    type Database = MongoDatabase;
    type Collection = MongoCollection;

    fn copy(&self) -> Self {
        Self {
            client: self.client.clone(),
            database: self.database.clone(),
            database_name: self.database_name.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn database(&self, name: &str) -> MongoDatabase {
        MongoDatabase {
            inner: self.client.database(name),
            closed: Arc::clone(&self.closed),
        }
    }

    fn default_database(&self) -> MongoDatabase {
        MongoDatabase {
            inner: self.database.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Database selected from a [`Connection`]
pub struct MongoDatabase {
    inner: Database,
    closed: Arc<AtomicBool>,
}

impl MongoDatabase {
    pub fn inner(&self) -> &Database {
        &self.inner
    }
}

#[async_trait]
impl SessionDatabase for MongoDatabase {
    type Collection = MongoCollection;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn collection(&self, name: &str) -> MongoCollection {
        MongoCollection {
            inner: self.inner.collection(name),
            database_name: self.inner.name().to_string(),
            closed: Arc::clone(&self.closed),
        }
    }

    async fn drop_database(&self) -> Result<()> {
        ensure_open(&self.closed)?;
        self.inner.drop().await?;
        Ok(())
    }
}

/// Collection selected from a [`MongoDatabase`]
pub struct MongoCollection {
    inner: Collection<BsonDocument>,
    database_name: String,
    closed: Arc<AtomicBool>,
}

impl MongoCollection {
    pub fn inner(&self) -> &Collection<BsonDocument> {
        &self.inner
    }
}

#[async_trait]
impl SessionCollection for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        ensure_open(&self.closed)?;
        index.validate()?;
        self.inner
            .create_index(index.to_model())
            .await
            .map_err(|e| WebshopError::IndexCreation(e.to_string()))?;
        Ok(())
    }

    async fn insert(&self, document: BsonDocument) -> Result<()> {
        ensure_open(&self.closed)?;
        self.inner.insert_one(document).await?;
        Ok(())
    }

    async fn find_one(&self, filter: BsonDocument) -> Result<Option<BsonDocument>> {
        ensure_open(&self.closed)?;
        let found = self.inner.find_one(filter).await?;
        Ok(found)
    }
}

/// Opens one [`Connection`] per database from a shared base URI
#[derive(Debug, Clone)]
pub struct MongoConnector {
    pub base_uri: String,
    pub config: PoolConfig,
}

/// Environment variable naming the server used by test fixtures
pub const TEST_MONGO_URL_ENV: &str = "WEBSHOP_TEST_MONGO_URL";

/// Server used by test fixtures when the environment names none
pub const DEFAULT_TEST_MONGO_URL: &str = "mongodb://localhost";

impl MongoConnector {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            config: PoolConfig::default(),
        }
    }

    /// Connector for `WEBSHOP_TEST_MONGO_URL`, falling back to localhost
    pub fn from_env() -> Self {
        let uri = std::env::var(TEST_MONGO_URL_ENV)
            .unwrap_or_else(|_| DEFAULT_TEST_MONGO_URL.to_string());
        Self::new(uri)
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Driver options for the base URI with `database` as the default database
    pub async fn client_options(&self, database: &str) -> Result<ClientOptions> {
        let mut options = parse_options(&self.base_uri).await?;
        options.default_database = Some(database.to_string());
        Ok(options)
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Session = Connection;

    async fn open(&self, database: &str) -> Result<Connection> {
        let options = self.client_options(database).await?;
        Connection::with_options(options, self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.write_ack_min, Some(1));
        assert_eq!(config.app_name, Some("webshop".to_string()));
    }

    #[test]
    fn test_custom_pool_config() {
        let config = PoolConfig {
            min_pool_size: Some(5),
            max_pool_size: Some(50),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(5)),
            server_selection_timeout: Some(Duration::from_secs(10)),
            app_name: Some("my-app".to_string()),
            write_ack_min: Some(2),
            journal: Some(true),
        };
        let concern = config.write_concern().unwrap();
        assert_eq!(concern.w, Some(Acknowledgment::Nodes(2)));
        assert_eq!(concern.journal, Some(true));
    }

    #[test]
    fn test_no_write_concern_when_unset() {
        let config = PoolConfig {
            write_ack_min: None,
            journal: None,
            ..Default::default()
        };
        assert!(config.write_concern().is_none());
    }

    #[tokio::test]
    async fn test_client_options_sets_database() {
        let connector = MongoConnector::new(DEFAULT_TEST_MONGO_URL);
        let options = connector.client_options("t1").await.unwrap();
        assert_eq!(options.default_database.as_deref(), Some("t1"));

        let connector = MongoConnector::new("mongodb://u:p@h1:27017,h2/admin?replicaSet=rs0&appName=a@b");
        let options = connector.client_options("t1").await.unwrap();
        assert_eq!(options.default_database.as_deref(), Some("t1"));
        assert_eq!(options.hosts.len(), 2);
        assert_eq!(options.repl_set_name.as_deref(), Some("rs0"));
        assert_eq!(options.app_name.as_deref(), Some("a@b"));
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("u"));
        // Authentication still happens against the database named in the URI
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_connection_error() {
        let err = parse_options("localhost").await.unwrap_err();
        assert!(matches!(err, WebshopError::Connection(_)));
    }

    // Integration tests require a running MongoDB
    // Then: cargo test -p webshop-mongodb -- --ignored

    #[tokio::test]
    #[ignore]
    async fn test_ping_and_copy_close() {
        let connector = MongoConnector::from_env();
        let conn = connector.open("webshop_connection_ping").await.unwrap();
        assert!(conn.ping().await.unwrap());

        let copy = conn.copy();
        copy.close();
        assert!(copy.is_closed());
        assert!(!conn.is_closed());
        assert!(conn.ping().await.unwrap());
    }
}
