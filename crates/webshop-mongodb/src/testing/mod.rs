//! Test support: isolated, uniquely named databases per test

pub mod fixture;
pub mod locks;
pub mod test_name;

pub use fixture::{
    named_collections, release_db, setup_db, setup_named_db, DropFailure, Fixtures,
    NamedCollection, ReleaseReport, TestDb,
};
pub use locks::{CollectionLock, CollectionLocks};
pub use test_name::{database_name_for, resolve_test_name};
