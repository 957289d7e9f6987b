//! Offline-aware, cached catalog reads.
//!
//! Binds each [`crate::data::Catalog`] fetcher to a [`CatalogKey`] and the
//! shared [`crate::cache::QueryCache`].

mod cached;
mod keys;

pub use cached::{CachedCatalog, CatalogQuery};
pub use keys::{CatalogKey, KeyClass};
