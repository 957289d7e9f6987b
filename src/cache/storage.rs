//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The durable subset of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEntry {
  /// Canonical query key
  pub key: String,
  pub description: String,
  /// JSON-encoded value
  pub data: Vec<u8>,
  pub fetched_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<PersistedEntry>>;

  /// Insert or replace the entry for `entry.key`.
  fn set(&self, entry: &PersistedEntry) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// Every persisted entry, used to hydrate the cache at startup.
  fn load_all(&self) -> Result<Vec<PersistedEntry>>;

  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<PersistedEntry>> {
    Ok(None)
  }

  fn set(&self, _entry: &PersistedEntry) -> Result<()> {
    Ok(())
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn load_all(&self) -> Result<Vec<PersistedEntry>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// Process-local storage. Survives a cache being dropped and reopened, not a
/// process restart.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<PersistedEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, entry: &PersistedEntry) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn load_all(&self) -> Result<Vec<PersistedEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.values().cloned().collect())
  }

  fn clear(&self) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.clear();
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tuneline").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per query key; data is the serialized JSON payload
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    query_description TEXT NOT NULL,
    data BLOB NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_cache_fetched ON query_cache(fetched_at);
"#;

/// SHA256 hash for stable, fixed-length keys.
fn query_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<PersistedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT query_key, query_description, data, fetched_at FROM query_cache
         WHERE query_hash = ?",
        params![query_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    row
      .map(|(key, description, data, fetched_at)| {
        Ok(PersistedEntry {
          key,
          description,
          data,
          fetched_at: parse_datetime(&fetched_at)?,
        })
      })
      .transpose()
  }

  fn set(&self, entry: &PersistedEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_key, query_description, data, fetched_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          query_hash(&entry.key),
          entry.key,
          entry.description,
          entry.data,
          entry.fetched_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM query_cache WHERE query_hash = ?",
        params![query_hash(key)],
      )
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn load_all(&self) -> Result<Vec<PersistedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT query_key, query_description, data, fetched_at FROM query_cache
         ORDER BY fetched_at",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, Vec<u8>, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // Rows with an unreadable timestamp are skipped rather than failing hydration
    let entries = rows
      .into_iter()
      .filter_map(|(key, description, data, fetched_at)| {
        let fetched_at = parse_datetime(&fetched_at).ok()?;
        Some(PersistedEntry {
          key,
          description,
          data,
          fetched_at,
        })
      })
      .collect();

    Ok(entries)
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// Parse an RFC 3339 timestamp as written by `set`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &str, data: &str) -> PersistedEntry {
    PersistedEntry {
      key: key.to_string(),
      description: format!("{} (test)", key),
      data: data.as_bytes().to_vec(),
      fetched_at: Utc::now(),
    }
  }

  #[test]
  fn test_sqlite_set_get_roundtrip() {
    let storage = SqliteStorage::in_memory().unwrap();
    let stored = entry("songs:trend:week", r#"[{"id":1}]"#);
    storage.set(&stored).unwrap();

    let loaded = storage.get("songs:trend:week").unwrap().unwrap();
    assert_eq!(loaded.key, stored.key);
    assert_eq!(loaded.description, stored.description);
    assert_eq!(loaded.data, stored.data);
    assert_eq!(loaded.fetched_at, stored.fetched_at);
  }

  #[test]
  fn test_sqlite_missing_key() {
    let storage = SqliteStorage::in_memory().unwrap();
    assert!(storage.get("nope").unwrap().is_none());
  }

  #[test]
  fn test_sqlite_set_replaces() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.set(&entry("pulses:50", "[1]")).unwrap();
    storage.set(&entry("pulses:50", "[2]")).unwrap();

    let all = storage.load_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].data, b"[2]".to_vec());
  }

  #[test]
  fn test_sqlite_remove_and_clear() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.set(&entry("a", "1")).unwrap();
    storage.set(&entry("b", "2")).unwrap();

    storage.remove("a").unwrap();
    assert!(storage.get("a").unwrap().is_none());
    assert_eq!(storage.load_all().unwrap().len(), 1);

    storage.clear().unwrap();
    assert!(storage.load_all().unwrap().is_empty());
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.set(&entry("songs:all", "[]")).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let loaded = storage.get("songs:all").unwrap().unwrap();
    assert_eq!(loaded.data, b"[]".to_vec());
  }

  #[test]
  fn test_query_hash_is_fixed_length() {
    assert_eq!(query_hash("a").len(), 64);
    assert_eq!(query_hash(&"x".repeat(500)).len(), 64);
    assert_ne!(query_hash("a"), query_hash("b"));
  }

  #[test]
  fn test_memory_storage() {
    let storage = MemoryStorage::new();
    storage.set(&entry("k", "1")).unwrap();
    assert_eq!(storage.get("k").unwrap().unwrap().data, b"1".to_vec());
    storage.remove("k").unwrap();
    assert!(storage.get("k").unwrap().is_none());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.set(&entry("k", "1")).unwrap();
    assert!(storage.get("k").unwrap().is_none());
    assert!(storage.load_all().unwrap().is_empty());
  }
}
