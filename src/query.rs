//! Query observer for poll-driven event loops.
//!
//! Inspired by TanStack Query's `useQuery`: a `Query<T>` binds one cache key
//! to its fetch function and options, and reports when the shared cache entry
//! changed so the caller knows to re-render.
//!
//! # Example
//!
//! ```ignore
//! let catalog = catalog.clone();
//! let mut query = Query::new(&cache, "songs:trend:week", move || {
//!     let catalog = catalog.clone();
//!     async move { catalog.trending(TrendWindow::Week).await.map(Outcome::Ready) }
//! });
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! let state = query.state();
//! if state.is_loading { render_spinner() }
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cache::{Outcome, QueryCache, QueryOptions, QueryResult};
use crate::error::FetchError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<Outcome<T>, FetchError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Observer of a single cache key.
///
/// Dropping a `Query` does not cancel a fetch it started; the result still
/// lands in the shared cache.
pub struct Query<T> {
  cache: QueryCache,
  key: String,
  fetcher: FetcherFn<T>,
  options: QueryOptions,
  seen_version: Option<u64>,
  state: QueryResult<T>,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  pub fn new<F, Fut>(cache: &QueryCache, key: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<T>, FetchError>> + Send + 'static,
  {
    let key = key.into();
    let state = cache.peek(&key);
    Self {
      options: cache.defaults(),
      cache: cache.clone(),
      seen_version: cache.version(&key),
      key,
      fetcher: Arc::new(move || -> BoxFuture<T> { Box::pin(fetcher()) }),
      state,
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Latest state seen by `fetch` or `poll`.
  pub fn state(&self) -> &QueryResult<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data.as_ref()
  }

  /// Request the key from the cache. A no-op fetch-wise if the entry is
  /// fresh, already fetching, or we are offline.
  pub fn fetch(&mut self) {
    let fetcher = Arc::clone(&self.fetcher);
    self.state = self.cache.request(&self.key, move || fetcher(), self.options);
    self.seen_version = self.cache.version(&self.key);
  }

  /// Mark the entry stale and request it again. This is the caller-driven
  /// retry after an error.
  pub fn refetch(&mut self) {
    self.cache.invalidate(&self.key);
    self.fetch();
  }

  /// Returns `true` if the cache entry changed since the last look.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let version = self.cache.version(&self.key);
    if version == self.seen_version {
      return false;
    }

    self.seen_version = version;
    self.state = self.cache.peek(&self.key);
    true
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
