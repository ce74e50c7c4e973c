//! Index management over leak-tracked collection handles

use bson::{doc, Document as BsonDocument};
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use std::time::Duration;
use tracing::debug;
use webshop_common::{Result, WebshopError};

use crate::session::{Session, SessionCollection};
use crate::supplier::CollectionSupplier;

/// Index description forwarded to the store.
///
/// Key fields are ascending unless prefixed with `-`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    pub key: Vec<String>,
    pub unique: bool,
    pub sparse: bool,
    pub background: bool,
    pub name: Option<String>,
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn new<I, K>(key: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Field names with their sort direction (1 or -1)
    pub fn fields(&self) -> Vec<(&str, i32)> {
        self.key
            .iter()
            .map(|k| {
                if let Some(field) = k.strip_prefix('-') {
                    (field, -1)
                } else {
                    (k.strip_prefix('+').unwrap_or(k), 1)
                }
            })
            .collect()
    }

    /// Key document, e.g. `{ "name": 1, "created": -1 }`
    pub fn keys_document(&self) -> BsonDocument {
        let mut keys = BsonDocument::new();
        for (field, direction) in self.fields() {
            keys.insert(field, direction);
        }
        keys
    }

    /// Explicit name, or the server's default `field_dir` naming
    pub fn index_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .fields()
                .iter()
                .map(|(field, direction)| format!("{}_{}", field, direction))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    pub fn to_model(&self) -> IndexModel {
        let mut options = IndexOptions::default();
        options.name = Some(self.index_name());
        if self.unique {
            options.unique = Some(true);
        }
        if self.sparse {
            options.sparse = Some(true);
        }
        if self.background {
            options.background = Some(true);
        }
        options.expire_after = self.expire_after;

        IndexModel::builder()
            .keys(self.keys_document())
            .options(options)
            .build()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(WebshopError::IndexCreation(
                "index key must name at least one field".to_string(),
            ));
        }
        if self.fields().iter().any(|(field, _)| field.is_empty()) {
            return Err(WebshopError::IndexCreation(format!(
                "invalid index key {:?}",
                self.key
            )));
        }
        Ok(())
    }
}

/// An index whose collection is resolved through a supplier at ensure time
pub struct CollectionIndex<S: Session> {
    pub collection: CollectionSupplier<S>,
    pub index: IndexSpec,
}

impl<S: Session> CollectionIndex<S> {
    pub fn new(collection: CollectionSupplier<S>, index: IndexSpec) -> Self {
        Self { collection, index }
    }

    /// Ensure the index exists, creating it when necessary.
    ///
    /// The collection handle is released on every exit path. A leak flagged while
    /// acquiring it does not stop the index from being ensured.
    pub async fn ensure_index(&self) -> Result<()> {
        let handle = self.collection.supply().into_inner();
        debug!(
            collection = handle.name(),
            index = %self.index.index_name(),
            "Ensuring index"
        );
        let result = handle.ensure_index(&self.index).await.map_err(|e| match e {
            WebshopError::IndexCreation(_) => e,
            other => WebshopError::IndexCreation(other.to_string()),
        });
        drop(handle);
        result
    }
}

/// Indexes ensured together, in order
pub struct CollectionIndices<S: Session>(pub Vec<CollectionIndex<S>>);

impl<S: Session> CollectionIndices<S> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, index: CollectionIndex<S>) {
        self.0.push(index);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ensure every index, stopping at the first failure
    pub async fn ensure_all(&self) -> Result<()> {
        for index in &self.0 {
            index.ensure_index().await?;
        }
        Ok(())
    }
}

impl<S: Session> Default for CollectionIndices<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Session> FromIterator<CollectionIndex<S>> for CollectionIndices<S> {
    fn from_iter<I: IntoIterator<Item = CollectionIndex<S>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
