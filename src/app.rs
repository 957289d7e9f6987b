use crate::commands::{CacheCommand, Command};
use crate::event::{Event, EventHandler};
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tuneline::cache::{
  CacheStorage, MemoryStorage, NoopStorage, QueryCache, QueryKey, QueryResult, SqliteStorage,
};
use tuneline::catalog::{CachedCatalog, CatalogQuery};
use tuneline::config::{CacheConfig, Config};
use tuneline::data::{Catalog, GenreFilter, SupabaseSource, TrendWindow};
use tuneline::network::{FlagFileShell, NetworkMonitor, OfflineCheck, ProbeSignal};
use tuneline::render;

/// Flags that apply to every command
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
  /// Act as if the network were down
  pub offline: bool,
  /// Treat cached entries as stale
  pub refresh: bool,
}

/// Main application state
pub struct App {
  config: Config,
  flags: RunFlags,
  monitor: NetworkMonitor,
  cache: QueryCache,
  catalog: CachedCatalog,
  gc: JoinHandle<()>,
}

impl App {
  pub async fn new(config: Config, flags: RunFlags) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let source = SupabaseSource::new(&config.supabase.url, api_key, config.supabase.timeout())?;

    let monitor = NetworkMonitor::new();
    if flags.offline {
      monitor.set_simulated_offline(true);
    }
    let network = &config.network;
    monitor
      .start(ProbeSignal::new(
        network.probe_host.clone(),
        Duration::from_secs(network.probe_interval_secs),
        Duration::from_secs(network.probe_timeout_secs),
      ))
      .await;

    let cache = QueryCache::open_with_retention(
      open_storage(&config.cache),
      monitor.clone(),
      config.cache.defaults(),
      config.cache.retention(),
    )
    .await;
    let gc = cache.spawn_gc(config.cache.gc_interval());

    let mut offline = OfflineCheck::new(monitor.clone());
    if let Some(flag) = &network.offline_flag {
      offline = offline.with_shell(Arc::new(FlagFileShell::new(flag)));
    }

    let catalog = Catalog::new(Arc::new(source)).with_policies(config.failure_policy);
    let mut cached = CachedCatalog::new(catalog, cache.clone(), offline);
    for class in config.cache.classes.keys() {
      cached = cached.with_class_options(*class, config.cache.options_for(*class));
    }

    Ok(Self {
      config,
      flags,
      monitor,
      cache,
      catalog: cached,
      gc,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    debug!(?command, "running command");
    let now = Utc::now();

    match command {
      Command::Status => {
        println!("{}", render::network_status(&self.monitor.status()));
        println!("cache: {} entries", self.cache.len());
        Ok(())
      }
      Command::Trending { window } => {
        let title = format!("Trending ({})", window);
        self
          .show_list(&title, self.catalog.trending(window), render::song_row)
          .await
      }
      Command::Songs { title, genre } => {
        let query = match (title, genre) {
          (Some(title), _) => self.catalog.songs_by_title(&title),
          (None, Some(genre)) => self.catalog.songs_by_genre(GenreFilter::parse(&genre)),
          (None, None) => self.catalog.songs(),
        };
        self.show_list("Songs", query, render::song_row).await
      }
      Command::Song { id } => self.show_song(id).await,
      Command::Playlists { user } => {
        let user = self.user(user)?;
        self
          .show_list("Playlists", self.catalog.playlists(&user), render::playlist_row)
          .await
      }
      Command::Playlist { id } => {
        let title = format!("Playlist #{}", id);
        self
          .show_list(&title, self.catalog.playlist_songs(id), render::song_row)
          .await
      }
      Command::Liked { user } => {
        let user = self.user(user)?;
        self
          .show_list("Liked songs", self.catalog.liked_songs(&user), render::song_row)
          .await
      }
      Command::Pulses { limit } => {
        self
          .show_list("Pulses", self.catalog.pulses(limit), |pulse| {
            render::pulse_row(pulse, now)
          })
          .await
      }
      Command::Recommend { genres, limit } => {
        let genres = genres.as_deref().map(GenreFilter::parse).unwrap_or_default();
        self
          .show_list(
            "Recommended",
            self.catalog.recommendations(genres, limit),
            render::song_row,
          )
          .await
      }
      Command::Cache(command) => {
        self.run_cache(command);
        Ok(())
      }
      Command::Watch { window } => self.watch(window).await,
    }
  }

  fn run_cache(&self, command: CacheCommand) {
    match command {
      CacheCommand::List => {
        let now = Utc::now();
        let mut keys = self.cache.keys();
        keys.sort();
        if keys.is_empty() {
          println!("cache is empty");
        }
        for key in keys {
          let entry: QueryResult<serde_json::Value> = self.cache.peek(&key);
          let age = entry
            .fetched_at
            .map(|at| render::relative_age(at, now))
            .unwrap_or_else(|| "never fetched".to_string());
          let stale = if entry.is_stale { ", stale" } else { "" };
          println!("{:<40} {}{} ({})", key, entry.status, stale, age);
        }
      }
      CacheCommand::Clear => {
        let count = self.cache.len();
        self.cache.clear();
        info!(count, "cache cleared");
        println!("cleared {} entries", count);
      }
      CacheCommand::Invalidate { prefix } => {
        let count = self.cache.invalidate_prefix(&prefix);
        println!("invalidated {} entries", count);
      }
    }
  }

  async fn show_list<T>(
    &self,
    title: &str,
    query: CatalogQuery<Vec<T>>,
    row: impl Fn(&T) -> String,
  ) -> Result<()>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    let result = self.load(&query).await;
    print!("{}", render::list(title, &result, Utc::now(), row));
    check(&query, &result)
  }

  async fn show_song(&self, id: i64) -> Result<()> {
    let query = self.catalog.song(id);
    let result = self.load(&query).await;
    if let Some(note) = render::state_note(&result, Utc::now()) {
      println!("{}", note);
    }
    match &result.data {
      Some(Some(song)) => print!("{}", render::song_detail(song)),
      Some(None) => println!("song {} not found", id),
      None => {}
    }
    check(&query, &result)
  }

  async fn load<T>(&self, query: &CatalogQuery<T>) -> QueryResult<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    if self.flags.refresh {
      query.invalidate();
    }
    query.load().await
  }

  async fn watch(&self, window: TrendWindow) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(250), &self.monitor, &self.cache);
    let mut query = self.catalog.trending(window).observe();
    let title = format!("Trending ({})", window);

    println!("{}", render::network_status(&self.monitor.status()));
    query.fetch();
    print!("{}", render::list(&title, query.state(), Utc::now(), render::song_row));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
      tokio::select! {
        _ = &mut ctrl_c => break,
        event = events.next() => match event {
          Some(Event::Network(status)) => {
            println!("{}", render::network_status(&status));
            if status.is_online {
              query.fetch();
            }
          }
          Some(Event::Cache(event)) => debug!(key = %event.key, status = %event.status, "cache event"),
          Some(Event::Tick) => {
            if query.poll() {
              print!("{}", render::list(&title, query.state(), Utc::now(), render::song_row));
            }
          }
          None => break,
        },
      }
    }

    Ok(())
  }

  fn user(&self, explicit: Option<String>) -> Result<String> {
    explicit
      .or_else(|| self.config.user_id.clone())
      .ok_or_else(|| eyre!("No user given. Pass --user or set user_id in the config file."))
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.gc.abort();
  }
}

/// Fail the command when there is an error and nothing to show.
fn check<T>(query: &CatalogQuery<T>, result: &QueryResult<T>) -> Result<()>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  match (&result.data, &result.error) {
    (None, Some(error)) => Err(eyre!("Failed to load {}: {}", query.key().description(), error)),
    _ => Ok(()),
  }
}

/// Open persistent storage. Failing to open it costs persistence, never the
/// command.
fn open_storage(config: &CacheConfig) -> Arc<dyn CacheStorage> {
  if !config.enabled {
    return Arc::new(NoopStorage);
  }

  let opened = match &config.path {
    Some(path) => SqliteStorage::open_at(path),
    None => SqliteStorage::open(),
  };
  match opened {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!("cache persistence unavailable, keeping entries in memory: {}", e);
      Arc::new(MemoryStorage::new())
    }
  }
}
