//! Per-entity fetchers. Each one issues a single declarative query and
//! decodes the rows; none of them cache or know about connectivity.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::error::FetchError;

use super::source::{RemoteSource, SelectQuery};
use super::types::{FailurePolicies, FailurePolicy, GenreFilter, Playlist, Pulse, Song, TrendWindow};

/// Songs returned for a trending chart
pub const TRENDING_LIMIT: usize = 20;

/// Typed reads over a [`RemoteSource`].
#[derive(Clone)]
pub struct Catalog {
  source: Arc<dyn RemoteSource>,
  policies: FailurePolicies,
}

impl Catalog {
  pub fn new(source: Arc<dyn RemoteSource>) -> Self {
    Self {
      source,
      policies: FailurePolicies::default(),
    }
  }

  pub fn with_policies(mut self, policies: FailurePolicies) -> Self {
    self.policies = policies;
    self
  }

  pub fn policies(&self) -> &FailurePolicies {
    &self.policies
  }

  /// All songs, newest first
  pub async fn songs(&self) -> Result<Vec<Song>, FetchError> {
    let query = SelectQuery::from("songs").order("created_at", false);
    self.list("songs", query, self.policies.songs).await
  }

  /// Songs whose title contains `title`, case-insensitively. An empty title
  /// returns every song.
  pub async fn songs_by_title(&self, title: &str) -> Result<Vec<Song>, FetchError> {
    let title = title.trim();
    if title.is_empty() {
      return self.songs().await;
    }
    let query = SelectQuery::from("songs")
      .ilike("title", format!("*{}*", title))
      .order("created_at", false);
    self.list("songs", query, self.policies.songs).await
  }

  /// Songs tagged with any of `genres`. `genre` holds a comma-separated tag
  /// list, so the query narrows by substring and tags are matched here.
  pub async fn songs_by_genre(&self, genres: &GenreFilter) -> Result<Vec<Song>, FetchError> {
    if genres.is_empty() {
      return self.songs().await;
    }
    let query = SelectQuery::from("songs")
      .any_ilike("genre", genre_patterns(genres))
      .order("created_at", false);
    let songs = self.list("songs", query, self.policies.songs).await?;
    Ok(tagged(songs, genres))
  }

  /// A single song. `Ok(None)` when no row matches.
  pub async fn song(&self, id: i64) -> Result<Option<Song>, FetchError> {
    let query = SelectQuery::from("songs").eq("id", id).limit(1);
    let rows = self.list::<Song>("song", query, self.policies.song).await?;
    Ok(rows.into_iter().next())
  }

  /// Playlists owned by `user_id`
  pub async fn playlists(&self, user_id: &str) -> Result<Vec<Playlist>, FetchError> {
    let query = SelectQuery::from("playlists")
      .eq("user_id", user_id)
      .order("created_at", false);
    self.list("playlists", query, self.policies.playlists).await
  }

  pub async fn playlist_songs(&self, playlist_id: i64) -> Result<Vec<Song>, FetchError> {
    let query = SelectQuery::from("playlist_songs")
      .select("*,songs(*)")
      .eq("playlist_id", playlist_id)
      .order("created_at", false);
    self
      .embedded_songs("playlist_songs", query, self.policies.playlist_songs)
      .await
  }

  pub async fn liked_songs(&self, user_id: &str) -> Result<Vec<Song>, FetchError> {
    let query = SelectQuery::from("liked_songs")
      .select("*,songs(*)")
      .eq("user_id", user_id)
      .order("created_at", false);
    self
      .embedded_songs("liked_songs", query, self.policies.liked_songs)
      .await
  }

  /// Most recent pulses
  pub async fn pulses(&self, limit: usize) -> Result<Vec<Pulse>, FetchError> {
    let query = SelectQuery::from("pulses")
      .order("created_at", false)
      .limit(limit);
    self.list("pulses", query, self.policies.pulses).await
  }

  /// Most played songs in any of `genres`; all genres when the filter is empty.
  pub async fn recommendations(
    &self,
    genres: &GenreFilter,
    limit: usize,
  ) -> Result<Vec<Song>, FetchError> {
    let mut query = SelectQuery::from("songs");
    if !genres.is_empty() {
      query = query.any_ilike("genre", genre_patterns(genres));
    }
    let query = query.order("play_count", false).limit(limit);
    let songs = self
      .list("recommendations", query, self.policies.recommendations)
      .await?;
    Ok(tagged(songs, genres))
  }

  /// Most played songs released within `window`
  pub async fn trending(&self, window: TrendWindow) -> Result<Vec<Song>, FetchError> {
    let mut query = SelectQuery::from("songs");
    if let Some(since) = window.since(Utc::now()) {
      query = query.gte("created_at", since.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    let query = query.order("play_count", false).limit(TRENDING_LIMIT);
    self.list("trending", query, self.policies.trending).await
  }

  async fn list<T: DeserializeOwned>(
    &self,
    entity: &'static str,
    query: SelectQuery,
    policy: FailurePolicy,
  ) -> Result<Vec<T>, FetchError> {
    let result = self.source.select(&query).await.and_then(decode::<T>);
    match result {
      Ok(records) => Ok(records),
      Err(e) => recover(entity, policy, e).map(|()| Vec::new()),
    }
  }

  /// Rows of a join table with the song embedded under `songs`.
  async fn embedded_songs(
    &self,
    entity: &'static str,
    query: SelectQuery,
    policy: FailurePolicy,
  ) -> Result<Vec<Song>, FetchError> {
    let result = self.source.select(&query).await.and_then(|rows| {
      let songs: Vec<Value> = rows
        .into_iter()
        .filter_map(|mut row| row.get_mut("songs").map(Value::take))
        .filter(|song| !song.is_null())
        .collect();
      decode(songs)
    });
    match result {
      Ok(songs) => Ok(songs),
      Err(e) => recover(entity, policy, e).map(|()| Vec::new()),
    }
  }
}

fn genre_patterns(genres: &GenreFilter) -> impl Iterator<Item = String> + '_ {
  genres.genres().iter().map(|genre| format!("*{}*", genre))
}

/// Keep songs carrying at least one tag in `genres`; an empty filter keeps all.
fn tagged(songs: Vec<Song>, genres: &GenreFilter) -> Vec<Song> {
  if genres.is_empty() {
    return songs;
  }
  songs
    .into_iter()
    .filter(|song| genres.matches(&song.genres()))
    .collect()
}

fn decode<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, FetchError> {
  rows
    .into_iter()
    .map(|row| serde_json::from_value(row).map_err(FetchError::from))
    .collect()
}

/// Network errors always propagate; everything else follows `policy`.
fn recover(entity: &str, policy: FailurePolicy, e: FetchError) -> Result<(), FetchError> {
  if e.is_network() {
    return Err(e);
  }
  error!(entity, kind = ?e.kind(), error = %e, "data source query failed");
  match policy {
    FailurePolicy::Degrade => Ok(()),
    FailurePolicy::Surface => Err(e),
  }
}
