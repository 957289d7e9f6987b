//! In-memory cache entry and its freshness rules.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::storage::PersistedEntry;
use super::traits::{FetchStatus, Outcome, QueryOptions, Snapshot};
use crate::error::FetchError;

/// Result of one fetch attempt, type-erased to JSON.
pub(crate) type Settled = Result<Outcome<Value>, FetchError>;

/// A fetch attempt that any number of callers can await.
pub(crate) type SharedAttempt = Shared<BoxFuture<'static, Settled>>;

/// A query function with its output type erased.
pub(crate) type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, Settled> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
  Missing,
  Fresh,
  Stale,
}

pub(crate) struct CacheEntry {
  pub key: String,
  pub description: String,
  pub value: Option<Value>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub status: FetchStatus,
  pub error: Option<FetchError>,
  pub options: QueryOptions,
  /// Forces the next request to refetch regardless of age.
  pub invalidated: bool,
  /// Attempt counter when `invalidated` was last set. Only an attempt started
  /// after that clears it.
  pub invalidated_by: u64,
  pub last_accessed: Instant,
  pub version: u64,
  /// Cache-wide id of the latest attempt; a settling attempt that no longer
  /// matches is dropped.
  pub attempt: u64,
  /// Set while an attempt has not settled, even if the entry is paused.
  pub in_flight: Option<SharedAttempt>,
  /// The running attempt was paused by an outage at least once.
  pub interrupted: bool,
  /// Most recent query function, kept so paused entries can restart.
  pub fetcher: Option<ErasedFetcher>,
}

impl CacheEntry {
  pub fn new(key: String, description: String, options: QueryOptions) -> Self {
    Self {
      key,
      description,
      value: None,
      fetched_at: None,
      status: FetchStatus::Idle,
      error: None,
      options,
      invalidated: false,
      invalidated_by: 0,
      last_accessed: Instant::now(),
      version: 0,
      attempt: 0,
      in_flight: None,
      interrupted: false,
      fetcher: None,
    }
  }

  /// Rebuild an entry from storage. Returns `None` if the payload is unreadable.
  pub fn from_persisted(persisted: PersistedEntry, options: QueryOptions) -> Option<Self> {
    let value: Value = serde_json::from_slice(&persisted.data).ok()?;
    let mut entry = Self::new(persisted.key, persisted.description, options);
    entry.value = Some(value);
    entry.fetched_at = Some(persisted.fetched_at);
    Some(entry)
  }

  pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
    self
      .fetched_at
      .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
  }

  pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
    match (&self.value, self.age(now)) {
      (Some(_), Some(age)) if !self.invalidated && age < self.options.stale_time => {
        Freshness::Fresh
      }
      (Some(_), Some(_)) => Freshness::Stale,
      _ => Freshness::Missing,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self
      .age(now)
      .map(|age| age > self.options.max_age)
      .unwrap_or(false)
  }

  pub fn drop_value(&mut self) {
    self.value = None;
    self.fetched_at = None;
  }

  pub fn is_collectable(&self) -> bool {
    !matches!(self.status, FetchStatus::Fetching | FetchStatus::Paused)
      && self.in_flight.is_none()
      && self.last_accessed.elapsed() >= self.options.gc_time
  }

  pub fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
    Snapshot {
      value: self.value.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      is_stale: self.freshness(now) == Freshness::Stale,
    }
  }

  pub fn persisted(&self) -> Option<PersistedEntry> {
    let value = self.value.as_ref()?;
    Some(PersistedEntry {
      key: self.key.clone(),
      description: self.description.clone(),
      data: serde_json::to_vec(value).ok()?,
      fetched_at: self.fetched_at?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entry_with_age(age: Duration, options: QueryOptions) -> CacheEntry {
    let mut entry = CacheEntry::new("k".into(), "k".into(), options);
    entry.value = Some(json!([1]));
    entry.fetched_at = Some(Utc::now() - chrono::Duration::from_std(age).unwrap());
    entry
  }

  #[test]
  fn test_missing_without_value() {
    let entry = CacheEntry::new("k".into(), "k".into(), QueryOptions::default());
    assert_eq!(entry.freshness(Utc::now()), Freshness::Missing);
  }

  #[test]
  fn test_fresh_then_stale() {
    let options = QueryOptions::default().with_stale_time(Duration::from_secs(60));
    let fresh = entry_with_age(Duration::from_secs(10), options);
    assert_eq!(fresh.freshness(Utc::now()), Freshness::Fresh);

    let stale = entry_with_age(Duration::from_secs(120), options);
    assert_eq!(stale.freshness(Utc::now()), Freshness::Stale);
  }

  #[test]
  fn test_invalidated_is_stale() {
    let mut entry = entry_with_age(Duration::ZERO, QueryOptions::default());
    entry.invalidated = true;
    assert_eq!(entry.freshness(Utc::now()), Freshness::Stale);
  }

  #[test]
  fn test_expiry_uses_max_age() {
    let options = QueryOptions::default().with_max_age(Duration::from_secs(3600));
    assert!(!entry_with_age(Duration::from_secs(60), options).is_expired(Utc::now()));
    assert!(entry_with_age(Duration::from_secs(7200), options).is_expired(Utc::now()));
  }

  #[test]
  fn test_persisted_roundtrip() {
    let entry = entry_with_age(Duration::from_secs(5), QueryOptions::default());
    let persisted = entry.persisted().unwrap();
    let restored = CacheEntry::from_persisted(persisted, QueryOptions::default()).unwrap();
    assert_eq!(restored.value, entry.value);
    assert_eq!(restored.fetched_at, entry.fetched_at);
    assert_eq!(restored.status, FetchStatus::Idle);
  }

  #[test]
  fn test_unreadable_payload_is_skipped() {
    let persisted = PersistedEntry {
      key: "k".into(),
      description: "k".into(),
      data: b"{not json".to_vec(),
      fetched_at: Utc::now(),
    };
    assert!(CacheEntry::from_persisted(persisted, QueryOptions::default()).is_none());
  }
}
