//! Products, the only domain of the webshop.
//!
//! Storage operations are not implemented yet.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webshop_common::{Result, WebshopError};
use webshop_mongodb::{CollectionIndex, CollectionIndices, CollectionSupplier, IndexSpec, Session};

pub const PRODUCTS_COLLECTION: &str = "products";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub desc: String,
}

/// Product operations over the products collection
pub struct ProductStore<S: Session> {
    products: CollectionSupplier<S>,
}

impl<S: Session> ProductStore<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self::from_supplier(CollectionSupplier::new(session, PRODUCTS_COLLECTION))
    }

    pub fn from_supplier(products: CollectionSupplier<S>) -> Self {
        Self { products }
    }

    /// Indexes the products collection relies on
    pub fn indices(&self) -> CollectionIndices<S> {
        let mut indices = CollectionIndices::new();
        indices.push(CollectionIndex::new(
            self.products.clone(),
            IndexSpec::new(["name"]).unique(true),
        ));
        indices
    }

    pub async fn find_product(&self, _id: ObjectId) -> Result<Product> {
        Err(not_implemented("find_product"))
    }

    pub async fn add_product(&self, _product: &Product) -> Result<ObjectId> {
        Err(not_implemented("add_product"))
    }

    pub async fn update_product(&self, _id: ObjectId, _product: &Product) -> Result<bool> {
        Err(not_implemented("update_product"))
    }

    pub async fn delete_product(&self, _id: ObjectId) -> Result<bool> {
        Err(not_implemented("delete_product"))
    }
}

fn not_implemented(operation: &str) -> WebshopError {
    WebshopError::NotImplemented(operation.to_string())
}
