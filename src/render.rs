//! Plain-text rendering of query results for the command line.

use chrono::{DateTime, Utc};

use crate::cache::QueryResult;
use crate::data::{Playlist, Pulse, Song};
use crate::network::NetworkStatus;

/// Truncate to `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Coarse age such as "5m ago"
pub fn relative_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let secs = (now - at).num_seconds().max(0);
  match secs {
    0..=59 => "just now".to_string(),
    60..=3599 => format!("{}m ago", secs / 60),
    3600..=86_399 => format!("{}h ago", secs / 3600),
    _ => format!("{}d ago", secs / 86_400),
  }
}

/// One-line note about where the data came from, if it needs one.
pub fn state_note<T>(result: &QueryResult<T>, now: DateTime<Utc>) -> Option<String> {
  let age = result
    .fetched_at
    .map(|at| relative_age(at, now))
    .unwrap_or_else(|| "never".to_string());

  if result.is_paused {
    return Some(if result.data.is_some() {
      format!("(cached, offline) last updated {}", age)
    } else {
      "(offline) nothing cached yet, will load when back online".to_string()
    });
  }
  if let Some(error) = &result.error {
    return Some(if result.data.is_some() {
      format!("(stale) refresh failed: {}", error)
    } else {
      format!("error: {}", error)
    });
  }
  if result.is_loading {
    return Some("loading...".to_string());
  }
  if result.is_stale {
    return Some(format!("(stale) last updated {}", age));
  }
  None
}

/// Render a titled list with its state note.
pub fn list<T>(
  title: &str,
  result: &QueryResult<Vec<T>>,
  now: DateTime<Utc>,
  row: impl Fn(&T) -> String,
) -> String {
  let mut out = format!("{}\n", title);
  if let Some(note) = state_note(result, now) {
    out.push_str(&format!("  {}\n", note));
  }
  match &result.data {
    Some(items) if items.is_empty() => out.push_str("  (none)\n"),
    Some(items) => {
      for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("  {:>3}. {}\n", i + 1, row(item)));
      }
    }
    None => {}
  }
  out
}

pub fn song_row(song: &Song) -> String {
  let genres = song.genres();
  let mut line = format!("{} - {}", truncate(&song.title, 40), truncate(&song.author, 30));
  if !genres.is_empty() {
    line.push_str(&format!(" [{}]", genres.join(", ")));
  }
  line.push_str(&format!(" ({} plays, #{})", song.play_count, song.id));
  line
}

pub fn song_detail(song: &Song) -> String {
  let mut out = format!("{}\n  by {}\n  id: {}\n", song.title, song.author, song.id);
  let genres = song.genres();
  if !genres.is_empty() {
    out.push_str(&format!("  genres: {}\n", genres.join(", ")));
  }
  out.push_str(&format!("  plays: {}\n", song.play_count));
  if let Some(created) = song.created_at {
    out.push_str(&format!("  added: {}\n", created.format("%Y-%m-%d")));
  }
  out
}

pub fn playlist_row(playlist: &Playlist) -> String {
  match &playlist.description {
    Some(desc) if !desc.is_empty() => {
      format!("{} (#{}) - {}", playlist.title, playlist.id, truncate(desc, 50))
    }
    _ => format!("{} (#{})", playlist.title, playlist.id),
  }
}

pub fn pulse_row(pulse: &Pulse, now: DateTime<Utc>) -> String {
  let when = pulse
    .created_at
    .map(|at| relative_age(at, now))
    .unwrap_or_default();
  format!("{} {}", truncate(&pulse.content, 70), when).trim_end().to_string()
}

pub fn network_status(status: &NetworkStatus) -> String {
  let state = match (status.is_initialized, status.is_online) {
    (false, _) => "unknown (assuming online)",
    (true, true) => "online",
    (true, false) => "offline",
  };
  let mut out = format!("network: {}", state);
  if status.was_offline {
    out.push_str(" (was offline this session)");
  }
  out
}
