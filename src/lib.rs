//! Offline-aware data layer for the tuneline music client.
//!
//! A [`network::NetworkMonitor`] tracks connectivity, a [`cache::QueryCache`]
//! serves keyed results with stale-while-refresh and pause-on-offline
//! semantics, and [`catalog::CachedCatalog`] binds the [`data::Catalog`]
//! fetchers to both.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod network;
pub mod query;
pub mod render;
pub mod subscribe;

pub use error::{ErrorKind, FetchError};
