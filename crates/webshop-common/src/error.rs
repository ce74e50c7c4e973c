//! Error types for webshop

use thiserror::Error;

/// Result type alias for webshop operations
pub type Result<T> = std::result::Result<T, WebshopError>;

/// Unified error type for all webshop operations
#[derive(Error, Debug, Clone)]
pub enum WebshopError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    /// Session could not be established, or was used after close
    #[error("Connection error: {0}")]
    Connection(String),

    /// More concurrent handles for a resource name than the threshold allows.
    /// Advisory: the handle that triggered it was still produced.
    #[error("Connection leak: {0}")]
    ConnectionLeak(String),

    #[error("Index creation failed: {0}")]
    IndexCreation(String),

    #[error("Database drop failed: {0}")]
    DatabaseDrop(String),

    /// Test fixture could not be allocated
    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebshopError {
    /// Returns true if the error only reports a condition and the operation
    /// that raised it still produced its result
    pub fn is_advisory(&self) -> bool {
        matches!(self, WebshopError::ConnectionLeak(_))
    }
}

impl From<serde_json::Error> for WebshopError {
    fn from(err: serde_json::Error) -> Self {
        WebshopError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for WebshopError {
    fn from(err: mongodb::error::Error) -> Self {
        WebshopError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for WebshopError {
    fn from(err: bson::ser::Error) -> Self {
        WebshopError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for WebshopError {
    fn from(err: bson::de::Error) -> Self {
        WebshopError::Serialization(format!("BSON deserialization error: {}", err))
    }
}
