//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Utc;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, ErasedFetcher, Freshness, Settled, SharedAttempt};
use super::storage::{CacheStorage, PersistedEntry};
use super::traits::{
  CacheEvent, FetchStatus, Outcome, QueryKey, QueryOptions, QueryResult, Snapshot,
};
use crate::error::FetchError;
use crate::network::NetworkMonitor;
use crate::subscribe::{Listeners, Subscription};

struct Inner {
  entries: Mutex<HashMap<String, CacheEntry>>,
  storage: Arc<dyn CacheStorage>,
  monitor: NetworkMonitor,
  defaults: QueryOptions,
  listeners: Listeners<CacheEvent>,
  versions: AtomicU64,
  attempts: AtomicU64,
  /// Persisted entries older than this are discarded on open
  retention: Duration,
  runtime: Handle,
  network: Subscription,
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.network.unsubscribe();
  }
}

/// Keyed, offline-aware query cache.
///
/// Serves whatever it has immediately, refreshes stale entries in the
/// background, pauses fetches while the [`NetworkMonitor`] reports offline and
/// resumes them on reconnect. Successful results are written through to a
/// [`CacheStorage`] and loaded back by [`QueryCache::open`].
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl QueryCache {
  /// Create the cache and hydrate it from `storage`.
  ///
  /// Persisted entries are in memory by the time this resolves, so the
  /// first request can see last-known values before any network call.
  /// Must be called from within a Tokio runtime.
  pub async fn open(
    storage: Arc<dyn CacheStorage>,
    monitor: NetworkMonitor,
    defaults: QueryOptions,
  ) -> Self {
    Self::open_with_retention(storage, monitor, defaults, defaults.max_age).await
  }

  /// Like [`QueryCache::open`], keeping persisted entries up to `retention`
  /// old. Use the longest `max_age` of any query so per-query expiry is
  /// decided on request.
  pub async fn open_with_retention(
    storage: Arc<dyn CacheStorage>,
    monitor: NetworkMonitor,
    defaults: QueryOptions,
    retention: Duration,
  ) -> Self {
    let runtime = Handle::current();
    let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
      let weak = weak.clone();
      let network = monitor.subscribe(move |status| {
        if let Some(inner) = weak.upgrade() {
          QueryCache { inner }.on_network_change(status.is_online);
        }
      });

      Inner {
        entries: Mutex::new(HashMap::new()),
        storage,
        monitor: monitor.clone(),
        defaults,
        listeners: Listeners::new(),
        versions: AtomicU64::new(0),
        attempts: AtomicU64::new(0),
        retention,
        runtime,
        network,
      }
    });

    let cache = Self { inner };
    cache.hydrate().await;
    cache
  }

  pub fn monitor(&self) -> &NetworkMonitor {
    &self.inner.monitor
  }

  pub fn defaults(&self) -> QueryOptions {
    self.inner.defaults
  }

  /// Return the current state for `key`, starting a background fetch if the
  /// entry is missing or stale, enabled, and we are online.
  ///
  /// While offline the entry is marked paused and `fetcher` is not invoked.
  /// Concurrent requests for a key that is already fetching share that fetch.
  pub fn request<K, T, F, Fut>(&self, key: &K, fetcher: F, options: QueryOptions) -> QueryResult<T>
  where
    K: QueryKey + ?Sized,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<T>, FetchError>> + Send + 'static,
  {
    let (snapshot, _) = self.ensure(
      key.cache_key(),
      key.description(),
      erase(fetcher),
      options,
    );
    snapshot.into_result()
  }

  /// Like [`QueryCache::request`], but waits for the fetch it started (or
  /// attached to) to settle before returning.
  pub async fn fetch<K, T, F, Fut>(&self, key: &K, fetcher: F, options: QueryOptions) -> QueryResult<T>
  where
    K: QueryKey + ?Sized,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<T>, FetchError>> + Send + 'static,
  {
    let cache_key = key.cache_key();
    let (snapshot, waiting) = self.ensure(
      cache_key.clone(),
      key.description(),
      erase(fetcher),
      options,
    );

    if waiting.is_none() {
      return snapshot.into_result();
    }

    // Follow restarts until no attempt is running
    let mut waiting = waiting;
    while let Some(attempt) = waiting.take() {
      let _ = attempt.await;
      waiting = self.running(&cache_key);
    }
    self.peek(&cache_key)
  }

  /// Read the current state without touching or fetching.
  pub fn peek<T: DeserializeOwned>(&self, key: &str) -> QueryResult<T> {
    let now = Utc::now();
    self
      .entries()
      .get(key)
      .map(|entry| entry.snapshot(now))
      .unwrap_or_else(Snapshot::empty)
      .into_result()
  }

  /// Version counter of an entry; changes on every observable mutation.
  pub fn version(&self, key: &str) -> Option<u64> {
    self.entries().get(key).map(|entry| entry.version)
  }

  fn running(&self, key: &str) -> Option<SharedAttempt> {
    self
      .entries()
      .get(key)
      .filter(|entry| entry.status == FetchStatus::Fetching)
      .and_then(|entry| entry.in_flight.clone())
  }

  pub fn status(&self, key: &str) -> Option<FetchStatus> {
    self.entries().get(key).map(|entry| entry.status)
  }

  /// Keys currently held in memory, sorted.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.entries().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Register a callback for cache changes. Runs synchronously after each
  /// mutation, outside the cache lock.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    self.inner.listeners.subscribe(callback)
  }

  /// Mark `key` stale so the next request refetches. Returns false if the
  /// key is not in memory.
  pub fn invalidate(&self, key: &str) -> bool {
    let event = {
      let mut entries = self.entries();
      let Some(entry) = entries.get_mut(key) else {
        return false;
      };
      self.mark_invalidated(entry);
      event_for(entry)
    };

    self.emit(vec![event]);
    true
  }

  /// Invalidate every in-memory key starting with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let events: Vec<CacheEvent> = {
      let mut entries = self.entries();
      entries
        .values_mut()
        .filter(|entry| entry.key.starts_with(prefix))
        .map(|entry| {
          self.mark_invalidated(entry);
          event_for(entry)
        })
        .collect()
    };

    let count = events.len();
    self.emit(events);
    count
  }

  /// Drop `key` from memory and storage. A fetch still in flight for it
  /// settles into nothing.
  pub fn remove(&self, key: &str) {
    self.entries().remove(key);
    self.forget_persisted(key);
  }

  /// Drop everything, in memory and on disk.
  pub fn clear(&self) {
    self.entries().clear();
    if let Err(e) = self.inner.storage.clear() {
      warn!("failed to clear persisted cache: {}", e);
    }
  }

  /// Remove in-memory entries untouched for longer than their `gc_time`.
  /// Persisted copies are kept and restored on the next request.
  pub fn collect_garbage(&self) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_collectable());
    let removed = before - entries.len();
    if removed > 0 {
      debug!(removed, "collected idle cache entries");
    }
    removed
  }

  /// Run [`QueryCache::collect_garbage`] every `interval` until the cache is dropped.
  pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    self.inner.runtime.spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        QueryCache { inner }.collect_garbage();
      }
    })
  }

  async fn hydrate(&self) -> usize {
    let storage = Arc::clone(&self.inner.storage);
    let loaded = match tokio::task::spawn_blocking(move || storage.load_all()).await {
      Ok(Ok(loaded)) => loaded,
      Ok(Err(e)) => {
        warn!("failed to load persisted cache, starting empty: {}", e);
        return 0;
      }
      Err(e) => {
        warn!("cache hydration task failed, starting empty: {}", e);
        return 0;
      }
    };

    let now = Utc::now();
    let mut discarded = Vec::new();
    let mut count = 0;
    {
      let mut entries = self.entries();
      for persisted in loaded {
        let key = persisted.key.clone();
        match CacheEntry::from_persisted(persisted, self.inner.defaults) {
          Some(entry) if entry.age(now).is_some_and(|age| age > self.inner.retention) => {
            discarded.push(key)
          }
          Some(mut entry) => {
            self.bump(&mut entry);
            entries.insert(key, entry);
            count += 1;
          }
          None => {
            warn!(key = %key, "dropping unreadable persisted cache entry");
            discarded.push(key);
          }
        }
      }
    }

    for key in discarded {
      self.forget_persisted(&key);
    }

    info!(count, "hydrated query cache");
    count
  }

  /// Look up `key` in storage for an entry that was collected from memory.
  /// A synchronous keyed lookup on the caller's thread, since `request` is
  /// synchronous; only keys missing from memory reach it.
  fn restore(&self, key: &str, options: QueryOptions) -> Option<CacheEntry> {
    match self.inner.storage.get(key) {
      Ok(Some(persisted)) => {
        let mut entry = CacheEntry::from_persisted(persisted, options)?;
        self.bump(&mut entry);
        debug!(key, "restored cache entry from storage");
        Some(entry)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, "failed to read persisted cache entry: {}", e);
        None
      }
    }
  }

  fn ensure(
    &self,
    key: String,
    description: String,
    fetcher: ErasedFetcher,
    options: QueryOptions,
  ) -> (Snapshot, Option<SharedAttempt>) {
    let restored = if self.entries().contains_key(&key) {
      None
    } else {
      self.restore(&key, options)
    };

    let online = self.inner.monitor.is_online();
    let now = Utc::now();
    let mut events = Vec::new();
    let mut expired = false;

    let (snapshot, waiting) = {
      let mut entries = self.entries();
      let entry = entries.entry(key.clone()).or_insert_with(|| {
        restored.unwrap_or_else(|| CacheEntry::new(key.clone(), description.clone(), options))
      });
      entry.options = options;
      entry.description = description;
      entry.last_accessed = Instant::now();
      entry.fetcher = Some(fetcher);

      if entry.is_expired(now) {
        debug!(key = %key, "cached value expired");
        entry.drop_value();
        expired = true;
      }

      if options.enabled && entry.freshness(now) != Freshness::Fresh {
        match entry.status {
          FetchStatus::Fetching => debug!(key = %key, "attaching to in-flight fetch"),
          _ if !online => {
            if entry.status != FetchStatus::Paused {
              debug!(key = %key, "offline, pausing fetch");
              entry.status = FetchStatus::Paused;
              self.bump(entry);
              events.push(event_for(entry));
            }
          }
          _ => {
            self.begin(entry);
            events.push(event_for(entry));
          }
        }
      }

      let waiting = match entry.status {
        FetchStatus::Fetching => entry.in_flight.clone(),
        _ => None,
      };
      let mut snapshot = entry.snapshot(now);
      // Offline requests report paused even when nothing needed fetching
      if !online && options.enabled && snapshot.status == FetchStatus::Idle {
        snapshot.status = FetchStatus::Paused;
      }
      (snapshot, waiting)
    };

    if expired {
      self.forget_persisted(&key);
    }
    self.emit(events);
    (snapshot, waiting)
  }

  /// Move an entry to `Fetching`: resume its running attempt if there is
  /// one, otherwise start a new attempt.
  fn begin(&self, entry: &mut CacheEntry) {
    if entry.in_flight.is_some() {
      debug!(key = %entry.key, "resuming in-flight fetch");
      entry.status = FetchStatus::Fetching;
      self.bump(entry);
      return;
    }

    let Some(fetcher) = entry.fetcher.clone() else {
      return;
    };

    let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
    entry.attempt = attempt;
    entry.interrupted = false;
    let key = entry.key.clone();
    let weak = Arc::downgrade(&self.inner);

    debug!(key = %key, attempt, "starting fetch");
    let shared = async move {
      let settled = fetcher().await;
      if let Some(inner) = weak.upgrade() {
        let cache = QueryCache { inner };
        if let Some(persisted) = cache.settle(&key, attempt, &settled) {
          cache.persist(persisted).await;
        }
      }
      settled
    }
    .boxed()
    .shared();

    entry.in_flight = Some(shared.clone());
    entry.status = FetchStatus::Fetching;
    self.bump(entry);
    self.inner.runtime.spawn(shared);
  }

  /// Record the outcome of `attempt`. Returns the entry to write through to
  /// storage after a success.
  fn settle(&self, key: &str, attempt: u64, settled: &Settled) -> Option<PersistedEntry> {
    let online = self.inner.monitor.is_online();

    let (event, persist) = {
      let mut entries = self.entries();
      let Some(entry) = entries.get_mut(key) else {
        debug!(key, "entry removed before fetch settled");
        return None;
      };
      if entry.attempt != attempt {
        return None;
      }

      entry.in_flight = None;
      let mut persist = None;
      match settled {
        Ok(Outcome::Ready(value)) => {
          entry.value = Some(value.clone());
          entry.fetched_at = Some(Utc::now());
          if attempt > entry.invalidated_by {
            entry.invalidated = false;
          }
          entry.status = FetchStatus::Idle;
          entry.error = None;
          persist = entry.persisted();
          debug!(key, "fetch succeeded");
        }
        Ok(Outcome::Skipped) => {
          debug!(key, "fetch skipped by offline check");
          entry.status = FetchStatus::Paused;
        }
        Err(e) if e.is_network() && (!online || entry.status == FetchStatus::Paused) => {
          debug!(key, error = %e, "network failure while offline, pausing");
          entry.status = FetchStatus::Paused;
        }
        Err(e) if e.is_network() && entry.interrupted => {
          debug!(key, error = %e, "attempt cut off by an outage failed, restarting");
          self.begin(entry);
        }
        Err(e) => {
          debug!(key, error = %e, "fetch failed");
          entry.status = FetchStatus::Error;
          entry.error = Some(e.clone());
        }
      }

      self.bump(entry);
      (event_for(entry), persist)
    };

    self.emit(vec![event]);
    persist
  }

  /// Write `persisted` through on the blocking pool. A key removed while the
  /// write ran is removed from storage again.
  async fn persist(&self, persisted: PersistedEntry) {
    let key = persisted.key.clone();
    let storage = Arc::clone(&self.inner.storage);
    match self
      .inner
      .runtime
      .spawn_blocking(move || storage.set(&persisted))
      .await
    {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(key = %key, "failed to persist cache entry: {}", e),
      Err(e) => warn!(key = %key, "cache write task failed: {}", e),
    }

    if !self.entries().contains_key(&key) {
      self.forget_persisted(&key);
    }
  }

  fn on_network_change(&self, online: bool) {
    let events: Vec<CacheEvent> = {
      let mut entries = self.entries();
      entries
        .values_mut()
        .filter_map(|entry| {
          if online {
            if entry.status != FetchStatus::Paused || !entry.options.enabled {
              return None;
            }
            self.begin(entry);
          } else {
            if entry.status != FetchStatus::Fetching {
              return None;
            }
            entry.interrupted = true;
            entry.status = FetchStatus::Paused;
            self.bump(entry);
          }
          Some(event_for(entry))
        })
        .collect()
    };

    if online {
      info!(resumed = events.len(), "back online, resuming paused queries");
    } else {
      info!(paused = events.len(), "offline, pausing in-flight queries");
    }
    self.emit(events);
  }

  fn forget_persisted(&self, key: &str) {
    if let Err(e) = self.inner.storage.remove(key) {
      warn!(key, "failed to remove persisted cache entry: {}", e);
    }
  }

  fn mark_invalidated(&self, entry: &mut CacheEntry) {
    entry.invalidated = true;
    entry.invalidated_by = self.inner.attempts.load(Ordering::Relaxed);
    self.bump(entry);
  }

  fn bump(&self, entry: &mut CacheEntry) {
    entry.version = self.inner.versions.fetch_add(1, Ordering::Relaxed) + 1;
  }

  fn emit(&self, events: Vec<CacheEvent>) {
    for event in &events {
      self.inner.listeners.notify(event);
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

impl std::fmt::Debug for QueryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("entries", &self.len())
      .field("defaults", &self.inner.defaults)
      .finish_non_exhaustive()
  }
}

fn event_for(entry: &CacheEntry) -> CacheEvent {
  CacheEvent {
    key: entry.key.clone(),
    status: entry.status,
  }
}

/// Wrap a typed query function so its output is stored as JSON.
fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Outcome<T>, FetchError>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetcher();
    async move {
      let settled: Settled = match fut.await {
        Ok(Outcome::Ready(data)) => serde_json::to_value(data)
          .map(Outcome::Ready)
          .map_err(FetchError::from),
        Ok(Outcome::Skipped) => Ok(Outcome::Skipped),
        Err(e) => Err(e),
      };
      settled
    }
    .boxed()
  })
}
