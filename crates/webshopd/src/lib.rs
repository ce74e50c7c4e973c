//! Webshop service: settings and the product domain.

pub mod config;
pub mod product;

pub use config::{Args, MongoDbSettings};
pub use product::{Product, ProductStore, PRODUCTS_COLLECTION};
