//! Cache keys for catalog reads.

use serde::Deserialize;

use crate::cache::QueryKey;
use crate::data::{GenreFilter, TrendWindow};

/// Query key for each catalog read.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CatalogKey {
  /// Every song
  Songs,
  /// Title search, normalized to lowercase
  SongsByTitle { title: String },
  SongsByGenre { genres: GenreFilter },
  Song { id: i64 },
  Playlists { user_id: String },
  PlaylistSongs { playlist_id: i64 },
  LikedSongs { user_id: String },
  Pulses { limit: usize },
  Recommendations { genres: GenreFilter, limit: usize },
  Trending { window: TrendWindow },
}

/// Groups of keys that share cache timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
  Songs,
  Song,
  Playlists,
  Pulses,
  Recommendations,
  Trending,
}

impl CatalogKey {
  pub fn class(&self) -> KeyClass {
    match self {
      Self::Songs | Self::SongsByTitle { .. } | Self::SongsByGenre { .. } => KeyClass::Songs,
      Self::Song { .. } => KeyClass::Song,
      Self::Playlists { .. } | Self::PlaylistSongs { .. } | Self::LikedSongs { .. } => {
        KeyClass::Playlists
      }
      Self::Pulses { .. } => KeyClass::Pulses,
      Self::Recommendations { .. } => KeyClass::Recommendations,
      Self::Trending { .. } => KeyClass::Trending,
    }
  }
}

impl QueryKey for CatalogKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Songs => "songs:all".to_string(),
      Self::SongsByTitle { title } => format!("songs:title:{}", title),
      Self::SongsByGenre { genres } => format!("songs:genre:{}", genres),
      Self::Song { id } => format!("song:{}", id),
      Self::Playlists { user_id } => format!("playlists:{}", user_id),
      Self::PlaylistSongs { playlist_id } => format!("playlist:{}:songs", playlist_id),
      Self::LikedSongs { user_id } => format!("liked:{}", user_id),
      Self::Pulses { limit } => format!("pulses:{}", limit),
      Self::Recommendations { genres, limit } => format!("recommend:{}:{}", genres, limit),
      Self::Trending { window } => format!("songs:trend:{}", window),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Songs => "all songs".to_string(),
      Self::SongsByTitle { title } => format!("songs matching \"{}\"", title),
      Self::SongsByGenre { genres } => format!("songs in {}", genres),
      Self::Song { id } => format!("song {}", id),
      Self::Playlists { user_id } => format!("playlists of {}", user_id),
      Self::PlaylistSongs { playlist_id } => format!("playlist {} songs", playlist_id),
      Self::LikedSongs { user_id } => format!("liked songs of {}", user_id),
      Self::Pulses { limit } => format!("latest {} pulses", limit),
      Self::Recommendations { genres, limit } => {
        if genres.is_empty() {
          format!("top {} recommendations", limit)
        } else {
          format!("top {} recommendations in {}", limit, genres)
        }
      }
      Self::Trending { window } => format!("trending ({})", window),
    }
  }
}
