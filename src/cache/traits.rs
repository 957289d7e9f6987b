//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::FetchError;

/// Identifies a cached query.
///
/// The cache key is the canonical, human-readable form (e.g.
/// `songs:trend:week`). Storage backends hash it for a fixed-length key.
pub trait QueryKey {
  fn cache_key(&self) -> String;

  /// Label for logs and `cache list`.
  fn description(&self) -> String {
    self.cache_key()
  }
}

impl QueryKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }
}

impl<K: QueryKey + ?Sized> QueryKey for &K {
  fn cache_key(&self) -> String {
    (**self).cache_key()
  }

  fn description(&self) -> String {
    (**self).description()
  }
}

/// What a query function produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
  Ready(T),
  /// The offline guard preempted the call. Not an error: the entry pauses.
  Skipped,
}

impl<T> Outcome<T> {
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
    match self {
      Outcome::Ready(v) => Outcome::Ready(f(v)),
      Outcome::Skipped => Outcome::Skipped,
    }
  }
}

/// Fetch state of a single cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  Idle,
  Fetching,
  /// Waiting for connectivity. Any previously cached value is kept.
  Paused,
  Error,
}

impl FetchStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      FetchStatus::Idle => "idle",
      FetchStatus::Fetching => "fetching",
      FetchStatus::Paused => "paused",
      FetchStatus::Error => "error",
    }
  }
}

impl std::fmt::Display for FetchStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-request cache timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// Age after which a value is refetched in the background.
  pub stale_time: Duration,
  /// How long an untouched entry stays in memory.
  pub gc_time: Duration,
  /// Age after which a value is discarded, in memory and on disk.
  pub max_age: Duration,
  /// When false the fetch function is never invoked.
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      gc_time: Duration::from_secs(5 * 60),
      max_age: Duration::from_secs(24 * 60 * 60),
      enabled: true,
    }
  }
}

impl QueryOptions {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

/// What a consumer sees for one key.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  /// Last successfully fetched value, possibly stale.
  pub data: Option<T>,
  pub status: FetchStatus,
  /// Fetching with nothing to show yet.
  pub is_loading: bool,
  pub is_fetching: bool,
  pub is_paused: bool,
  /// `data` is older than the entry's stale time (or was invalidated).
  pub is_stale: bool,
  pub error: Option<FetchError>,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> QueryResult<T> {
  pub fn is_success(&self) -> bool {
    self.data.is_some() && self.error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.status == FetchStatus::Error
  }
}

/// Untyped view of an entry, decoded into a [`QueryResult`] on the way out.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
  pub value: Option<Value>,
  pub status: FetchStatus,
  pub error: Option<FetchError>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub is_stale: bool,
}

impl Snapshot {
  pub fn empty() -> Self {
    Self {
      value: None,
      status: FetchStatus::Idle,
      error: None,
      fetched_at: None,
      is_stale: false,
    }
  }

  pub fn into_result<T: DeserializeOwned>(self) -> QueryResult<T> {
    let mut error = self.error;
    let data = match self.value {
      Some(value) => match serde_json::from_value(value) {
        Ok(data) => Some(data),
        Err(e) => {
          error = Some(FetchError::from(e));
          None
        }
      },
      None => None,
    };

    QueryResult {
      is_loading: self.status == FetchStatus::Fetching && data.is_none(),
      is_fetching: self.status == FetchStatus::Fetching,
      is_paused: self.status == FetchStatus::Paused,
      is_stale: self.is_stale,
      status: self.status,
      data,
      error,
      fetched_at: self.fetched_at,
    }
  }
}

/// Emitted to cache subscribers after every observable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  pub key: String,
  pub status: FetchStatus,
}
