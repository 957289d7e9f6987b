use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::tags::split_tags;

/// A track as stored in the `songs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
  pub id: i64,
  pub user_id: Option<String>,
  pub title: String,
  #[serde(default)]
  pub author: String,
  /// Comma-separated genre tags
  pub genre: Option<String>,
  pub song_path: Option<String>,
  pub image_path: Option<String>,
  #[serde(default)]
  pub play_count: i64,
  pub created_at: Option<DateTime<Utc>>,
}

impl Song {
  pub fn genres(&self) -> Vec<String> {
    split_tags(self.genre.as_deref())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
  pub id: i64,
  pub user_id: String,
  pub title: String,
  pub description: Option<String>,
  pub image_path: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
}

/// Short status post, optionally attached to a song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
  pub id: i64,
  pub user_id: String,
  pub content: String,
  pub song_id: Option<i64>,
  pub created_at: Option<DateTime<Utc>>,
}

/// Time window for trending charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrendWindow {
  #[default]
  All,
  Month,
  Week,
  Day,
}

impl TrendWindow {
  pub fn as_str(&self) -> &'static str {
    match self {
      TrendWindow::All => "all",
      TrendWindow::Month => "month",
      TrendWindow::Week => "week",
      TrendWindow::Day => "day",
    }
  }

  /// Start of the window, or `None` for all time.
  pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      TrendWindow::All => None,
      TrendWindow::Month => Some(now - Duration::days(30)),
      TrendWindow::Week => Some(now - Duration::days(7)),
      TrendWindow::Day => Some(now - Duration::days(1)),
    }
  }
}

impl std::fmt::Display for TrendWindow {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One or more genres. Normalized to lowercase, sorted and deduplicated so
/// equivalent filters share a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GenreFilter(Vec<String>);

impl GenreFilter {
  pub fn new<I, S>(genres: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut genres: Vec<String> = genres
      .into_iter()
      .map(|g| g.as_ref().trim().to_lowercase())
      .filter(|g| !g.is_empty())
      .collect();
    genres.sort();
    genres.dedup();
    Self(genres)
  }

  /// Parse a comma-separated list such as `"rock, Jazz"`.
  pub fn parse(raw: &str) -> Self {
    Self::new(split_tags(raw))
  }

  pub fn genres(&self) -> &[String] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether any of `tags` is in the filter, ignoring case.
  pub fn matches(&self, tags: &[String]) -> bool {
    tags
      .iter()
      .any(|tag| self.0.binary_search(&tag.to_lowercase()).is_ok())
  }
}

impl std::fmt::Display for GenreFilter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0.join(","))
  }
}

/// What a fetcher does with a data-source failure that isn't a network error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
  /// Log it and return an empty result.
  #[default]
  Degrade,
  /// Propagate it to the caller.
  Surface,
}

/// Failure policy per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FailurePolicies {
  pub songs: FailurePolicy,
  pub song: FailurePolicy,
  pub playlists: FailurePolicy,
  pub playlist_songs: FailurePolicy,
  pub liked_songs: FailurePolicy,
  pub pulses: FailurePolicy,
  pub recommendations: FailurePolicy,
  pub trending: FailurePolicy,
}

impl Default for FailurePolicies {
  fn default() -> Self {
    Self {
      songs: FailurePolicy::Degrade,
      // A missing song must be distinguishable from a failed lookup
      song: FailurePolicy::Surface,
      playlists: FailurePolicy::Degrade,
      playlist_songs: FailurePolicy::Degrade,
      liked_songs: FailurePolicy::Degrade,
      pulses: FailurePolicy::Degrade,
      recommendations: FailurePolicy::Degrade,
      trending: FailurePolicy::Degrade,
    }
  }
}
