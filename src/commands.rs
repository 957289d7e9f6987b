//! Available commands

use clap::Subcommand;
use tuneline::data::TrendWindow;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Show network and cache status
  Status,

  /// Most played songs in a time window
  Trending {
    #[arg(short, long, value_enum, default_value_t = TrendWindow::Week)]
    window: TrendWindow,
  },

  /// List songs, optionally by title or genre
  Songs {
    /// Case-insensitive title search
    #[arg(short, long, conflicts_with = "genre")]
    title: Option<String>,
    /// Comma-separated genres
    #[arg(short, long)]
    genre: Option<String>,
  },

  /// Show a single song
  Song { id: i64 },

  /// Playlists of a user (defaults to user_id from config)
  Playlists {
    #[arg(short, long)]
    user: Option<String>,
  },

  /// Songs in a playlist
  Playlist { id: i64 },

  /// Liked songs of a user (defaults to user_id from config)
  Liked {
    #[arg(short, long)]
    user: Option<String>,
  },

  /// Latest pulses
  Pulses {
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
  },

  /// Recommended songs
  Recommend {
    /// Comma-separated genres
    #[arg(short, long)]
    genres: Option<String>,
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },

  /// Inspect or clear the local cache
  #[command(subcommand)]
  Cache(CacheCommand),

  /// Follow the trending chart and connectivity changes until Ctrl-C
  Watch {
    #[arg(short, long, value_enum, default_value_t = TrendWindow::Week)]
    window: TrendWindow,
  },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
  /// List cached keys with their status and age
  List,
  /// Drop every entry, in memory and on disk
  Clear,
  /// Mark entries whose key starts with PREFIX as stale
  Invalidate { prefix: String },
}
