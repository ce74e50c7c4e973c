//! Common utilities for webshop
//!
//! This crate provides shared functionality used across all webshop crates.

pub mod error;

pub use error::{Result, WebshopError};
