//! Offline-aware query cache.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Serves cached values immediately and refreshes stale ones in the background
//! - Deduplicates concurrent fetches for the same key
//! - Pauses fetches while offline and resumes them on reconnect
//! - Persists successful results so they survive a restart

mod entry;
mod layer;
mod storage;
mod traits;

pub use layer::QueryCache;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, PersistedEntry, SqliteStorage};
pub use traits::{CacheEvent, FetchStatus, Outcome, QueryKey, QueryOptions, QueryResult};
