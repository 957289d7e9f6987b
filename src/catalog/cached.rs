//! Catalog reads bound to the query cache.
//!
//! Every read goes through the offline guard, so a fetch started while the
//! shell reports airplane mode settles as skipped and the entry pauses.

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::cache::{Outcome, QueryCache, QueryKey, QueryOptions, QueryResult};
use crate::data::{Catalog, GenreFilter, Playlist, Pulse, Song, TrendWindow};
use crate::error::FetchError;
use crate::network::OfflineCheck;
use crate::query::Query;

use super::keys::{CatalogKey, KeyClass};

type BoundFetcher<T> =
  Arc<dyn Fn() -> BoxFuture<'static, Result<Outcome<T>, FetchError>> + Send + Sync>;

/// One catalog read: its key, options, and guarded fetcher.
pub struct CatalogQuery<T> {
  cache: QueryCache,
  key: CatalogKey,
  options: QueryOptions,
  fetcher: BoundFetcher<T>,
}

impl<T> CatalogQuery<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  pub fn key(&self) -> &CatalogKey {
    &self.key
  }

  pub fn options(&self) -> QueryOptions {
    self.options
  }

  /// Current state, refreshing in the background when needed.
  pub fn request(&self) -> QueryResult<T> {
    let fetcher = Arc::clone(&self.fetcher);
    self.cache.request(&self.key, move || fetcher(), self.options)
  }

  /// Like [`CatalogQuery::request`], but waits for any fetch to settle.
  pub async fn load(&self) -> QueryResult<T> {
    let fetcher = Arc::clone(&self.fetcher);
    self.cache.fetch(&self.key, move || fetcher(), self.options).await
  }

  /// Observer for a poll-driven event loop.
  pub fn observe(&self) -> Query<T> {
    let fetcher = Arc::clone(&self.fetcher);
    Query::new(&self.cache, self.key.cache_key(), move || fetcher()).with_options(self.options)
  }

  /// Mark the entry stale so the next request refetches.
  pub fn invalidate(&self) -> bool {
    self.cache.invalidate(&self.key.cache_key())
  }
}

/// Cached, offline-aware access to the catalog.
#[derive(Clone)]
pub struct CachedCatalog {
  catalog: Catalog,
  cache: QueryCache,
  offline: OfflineCheck,
  classes: HashMap<KeyClass, QueryOptions>,
}

impl CachedCatalog {
  pub fn new(catalog: Catalog, cache: QueryCache, offline: OfflineCheck) -> Self {
    Self {
      catalog,
      cache,
      offline,
      classes: HashMap::new(),
    }
  }

  /// Override cache timing for one class of keys.
  pub fn with_class_options(mut self, class: KeyClass, options: QueryOptions) -> Self {
    self.classes.insert(class, options);
    self
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn offline(&self) -> &OfflineCheck {
    &self.offline
  }

  pub fn options_for(&self, class: KeyClass) -> QueryOptions {
    self
      .classes
      .get(&class)
      .copied()
      .unwrap_or_else(|| self.cache.defaults())
  }

  pub fn songs(&self) -> CatalogQuery<Vec<Song>> {
    self.bind(CatalogKey::Songs, |catalog| async move {
      catalog.songs().await
    })
  }

  /// Title search; a blank title is the same read as [`CachedCatalog::songs`].
  pub fn songs_by_title(&self, title: &str) -> CatalogQuery<Vec<Song>> {
    let title = title.trim().to_string();
    if title.is_empty() {
      return self.songs();
    }
    let key = CatalogKey::SongsByTitle {
      title: title.to_lowercase(),
    };
    self.bind(key, move |catalog| {
      let title = title.clone();
      async move { catalog.songs_by_title(&title).await }
    })
  }

  pub fn songs_by_genre(&self, genres: GenreFilter) -> CatalogQuery<Vec<Song>> {
    if genres.is_empty() {
      return self.songs();
    }
    let key = CatalogKey::SongsByGenre {
      genres: genres.clone(),
    };
    self.bind(key, move |catalog| {
      let genres = genres.clone();
      async move { catalog.songs_by_genre(&genres).await }
    })
  }

  pub fn song(&self, id: i64) -> CatalogQuery<Option<Song>> {
    self.bind(CatalogKey::Song { id }, move |catalog| async move {
      catalog.song(id).await
    })
  }

  pub fn playlists(&self, user_id: &str) -> CatalogQuery<Vec<Playlist>> {
    let user_id = user_id.to_string();
    let key = CatalogKey::Playlists {
      user_id: user_id.clone(),
    };
    self.bind(key, move |catalog| {
      let user_id = user_id.clone();
      async move { catalog.playlists(&user_id).await }
    })
  }

  pub fn playlist_songs(&self, playlist_id: i64) -> CatalogQuery<Vec<Song>> {
    self.bind(
      CatalogKey::PlaylistSongs { playlist_id },
      move |catalog| async move { catalog.playlist_songs(playlist_id).await },
    )
  }

  pub fn liked_songs(&self, user_id: &str) -> CatalogQuery<Vec<Song>> {
    let user_id = user_id.to_string();
    let key = CatalogKey::LikedSongs {
      user_id: user_id.clone(),
    };
    self.bind(key, move |catalog| {
      let user_id = user_id.clone();
      async move { catalog.liked_songs(&user_id).await }
    })
  }

  pub fn pulses(&self, limit: usize) -> CatalogQuery<Vec<Pulse>> {
    self.bind(CatalogKey::Pulses { limit }, move |catalog| async move {
      catalog.pulses(limit).await
    })
  }

  pub fn recommendations(&self, genres: GenreFilter, limit: usize) -> CatalogQuery<Vec<Song>> {
    let key = CatalogKey::Recommendations {
      genres: genres.clone(),
      limit,
    };
    self.bind(key, move |catalog| {
      let genres = genres.clone();
      async move { catalog.recommendations(&genres, limit).await }
    })
  }

  pub fn trending(&self, window: TrendWindow) -> CatalogQuery<Vec<Song>> {
    self.bind(CatalogKey::Trending { window }, move |catalog| async move {
      catalog.trending(window).await
    })
  }

  /// Wrap `run` in the offline guard and pair it with `key`.
  fn bind<T, F, Fut>(&self, key: CatalogKey, run: F) -> CatalogQuery<T>
  where
    F: Fn(Catalog) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Send + 'static,
  {
    let catalog = self.catalog.clone();
    let offline = self.offline.clone();
    let fetcher: BoundFetcher<T> = Arc::new(move || {
      let fetch = run(catalog.clone());
      let offline = offline.clone();
      async move { offline.guard(fetch).await }.boxed()
    });

    CatalogQuery {
      cache: self.cache.clone(),
      options: self.options_for(key.class()),
      key,
      fetcher,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FetchStatus, MemoryStorage};
  use crate::data::fake::FakeSource;
  use crate::network::{NetworkMonitor, ShellBridge, ShellStatus};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;

  struct Airplane(AtomicBool);

  #[async_trait]
  impl ShellBridge for Airplane {
    async fn connectivity(&self) -> color_eyre::Result<ShellStatus> {
      Ok(ShellStatus {
        is_offline: self.0.load(Ordering::SeqCst),
      })
    }
  }

  fn songs_source() -> Arc<FakeSource> {
    Arc::new(FakeSource::default().with(
      "songs",
      Ok(vec![
        json!({"id": 1, "title": "Night Drive", "genre": "Synthwave, Rock", "play_count": 9}),
        json!({"id": 2, "title": "Daybreak", "genre": "Rock", "play_count": 3}),
      ]),
    ))
  }

  async fn setup(source: Arc<FakeSource>) -> (CachedCatalog, NetworkMonitor) {
    let monitor = NetworkMonitor::new();
    monitor.initialize(true);
    let cache = QueryCache::open(
      Arc::new(MemoryStorage::new()),
      monitor.clone(),
      QueryOptions::default(),
    )
    .await;
    let catalog = CachedCatalog::new(
      Catalog::new(source),
      cache,
      OfflineCheck::new(monitor.clone()),
    );
    (catalog, monitor)
  }

  #[tokio::test]
  async fn test_load_populates_cache_once() {
    let source = songs_source();
    let (catalog, _monitor) = setup(source.clone()).await;

    let result = catalog.trending(TrendWindow::Week).load().await;
    assert!(result.is_success());
    assert_eq!(result.data.as_ref().map(Vec::len), Some(2));
    assert!(result.fetched_at.is_some());

    // Fresh entry, no second query
    let again = catalog.trending(TrendWindow::Week).load().await;
    assert_eq!(again.data, result.data);
    assert_eq!(source.queries().len(), 1);
    assert_eq!(catalog.cache().keys(), vec!["songs:trend:week".to_string()]);
  }

  #[tokio::test]
  async fn test_offline_pauses_without_querying() {
    let source = songs_source();
    let (catalog, monitor) = setup(source.clone()).await;
    monitor.set_platform_online(false);

    let result = catalog.songs().load().await;
    assert!(result.is_paused);
    assert!(result.data.is_none());
    assert!(result.error.is_none());
    assert!(source.queries().is_empty());

    monitor.set_platform_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let resumed: QueryResult<Vec<Song>> = catalog.cache().peek("songs:all");
    assert_eq!(resumed.status, FetchStatus::Idle);
    assert_eq!(resumed.data.map(|songs| songs.len()), Some(2));
  }

  #[tokio::test]
  async fn test_shell_airplane_mode_skips_fetch() {
    let source = songs_source();
    let (catalog, _monitor) = setup(source.clone()).await;
    let shell = Arc::new(Airplane(AtomicBool::new(true)));
    let catalog = CachedCatalog::new(
      Catalog::new(source.clone()),
      catalog.cache().clone(),
      catalog.offline().clone().with_shell(shell.clone()),
    );

    let result = catalog.song(1).load().await;
    assert!(result.is_paused);
    assert!(source.queries().is_empty());

    shell.0.store(false, Ordering::SeqCst);
    catalog.song(1).invalidate();
    let result = catalog.song(1).load().await;
    assert_eq!(result.data.flatten().map(|song| song.id), Some(1));
  }

  #[tokio::test]
  async fn test_blank_title_reads_all_songs() {
    let (catalog, _monitor) = setup(songs_source()).await;
    assert_eq!(catalog.songs_by_title("   ").key(), &CatalogKey::Songs);
    assert_eq!(
      catalog.songs_by_title(" Night ").key().cache_key(),
      "songs:title:night"
    );
    assert_eq!(
      catalog.songs_by_genre(GenreFilter::default()).key(),
      &CatalogKey::Songs
    );
  }

  #[tokio::test]
  async fn test_class_options_apply() {
    let (catalog, _monitor) = setup(songs_source()).await;
    let trending = QueryOptions::default().with_stale_time(Duration::from_secs(3600));
    let catalog = catalog.with_class_options(KeyClass::Trending, trending);

    assert_eq!(
      catalog.trending(TrendWindow::Day).options().stale_time,
      Duration::from_secs(3600)
    );
    assert_eq!(
      catalog.pulses(5).options().stale_time,
      QueryOptions::default().stale_time
    );
  }

  #[tokio::test]
  async fn test_observer_sees_background_result() {
    let (catalog, _monitor) = setup(songs_source()).await;
    let mut query = catalog.recommendations(GenreFilter::parse("rock"), 5).observe();
    assert_eq!(query.key(), "recommend:rock:5");

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(query.poll());
    assert_eq!(query.data().map(Vec::len), Some(2));
  }
}
