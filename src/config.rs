use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::QueryOptions;
use crate::catalog::KeyClass;
use crate::data::FailurePolicies;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub supabase: SupabaseConfig,
  /// User whose playlists and liked songs are listed by default
  pub user_id: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub failure_policy: FailurePolicies,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
  /// Project URL, e.g. https://abcd.supabase.co
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl SupabaseConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_timeout_secs() -> u64 {
  15
}

/// Cache timing in seconds. Unset fields inherit from the level above.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
  pub stale_secs: Option<u64>,
  pub gc_secs: Option<u64>,
  pub max_age_secs: Option<u64>,
}

impl TimingConfig {
  pub fn apply(&self, base: QueryOptions) -> QueryOptions {
    let mut options = base;
    if let Some(secs) = self.stale_secs {
      options = options.with_stale_time(Duration::from_secs(secs));
    }
    if let Some(secs) = self.gc_secs {
      options = options.with_gc_time(Duration::from_secs(secs));
    }
    if let Some(secs) = self.max_age_secs {
      options = options.with_max_age(Duration::from_secs(secs));
    }
    options
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Persist entries across restarts
  pub enabled: bool,
  /// SQLite file (defaults to $XDG_DATA_HOME/tuneline/cache.db)
  pub path: Option<PathBuf>,
  #[serde(flatten)]
  pub timing: TimingConfig,
  /// Per key class overrides, e.g. `trending: { stale_secs: 3600 }`
  pub classes: HashMap<KeyClass, TimingConfig>,
  pub gc_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      timing: TimingConfig::default(),
      classes: HashMap::new(),
      gc_interval_secs: 60,
    }
  }
}

impl CacheConfig {
  pub fn defaults(&self) -> QueryOptions {
    self.timing.apply(QueryOptions::default())
  }

  pub fn options_for(&self, class: KeyClass) -> QueryOptions {
    let defaults = self.defaults();
    self
      .classes
      .get(&class)
      .map(|timing| timing.apply(defaults))
      .unwrap_or(defaults)
  }

  /// Longest `max_age` across the defaults and every key class. Persisted
  /// entries older than this are dropped at startup.
  pub fn retention(&self) -> Duration {
    self
      .classes
      .keys()
      .map(|class| self.options_for(*class).max_age)
      .fold(self.defaults().max_age, Duration::max)
  }

  pub fn gc_interval(&self) -> Duration {
    Duration::from_secs(self.gc_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// host:port probed with a TCP connect to detect connectivity
  pub probe_host: String,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
  /// Airplane-mode flag file; offline while it exists
  pub offline_flag: Option<PathBuf>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_host: "1.1.1.1:443".to_string(),
      probe_interval_secs: 5,
      probe_timeout_secs: 2,
      offline_flag: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter used when TUNELINE_LOG is unset
  pub level: String,
  /// Log directory (defaults to $XDG_DATA_HOME/tuneline/logs)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tuneline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tuneline/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tuneline/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tuneline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tuneline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the Supabase anon key from environment variables.
  ///
  /// Checks TUNELINE_SUPABASE_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("TUNELINE_SUPABASE_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!(
          "Supabase key not found. Set TUNELINE_SUPABASE_KEY or SUPABASE_ANON_KEY environment variable."
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::FailurePolicy;
  use std::io::Write;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("supabase:\n  url: https://demo.supabase.co\n").unwrap();
    assert_eq!(config.supabase.timeout(), Duration::from_secs(15));
    assert!(config.cache.enabled);
    assert_eq!(config.cache.defaults(), QueryOptions::default());
    assert_eq!(config.network.probe_host, "1.1.1.1:443");
    assert_eq!(config.log.level, "info");
    assert_eq!(config.failure_policy, FailurePolicies::default());
  }

  #[test]
  fn test_class_overrides_inherit_defaults() {
    let config = Config::parse(
      r#"
supabase:
  url: https://demo.supabase.co
cache:
  stale_secs: 120
  max_age_secs: 3600
  classes:
    trending:
      stale_secs: 900
failure_policy:
  pulses: surface
"#,
    )
    .unwrap();

    let defaults = config.cache.defaults();
    assert_eq!(defaults.stale_time, Duration::from_secs(120));
    assert_eq!(defaults.max_age, Duration::from_secs(3600));

    let trending = config.cache.options_for(KeyClass::Trending);
    assert_eq!(trending.stale_time, Duration::from_secs(900));
    assert_eq!(trending.max_age, Duration::from_secs(3600));

    assert_eq!(config.cache.options_for(KeyClass::Song), defaults);
    assert_eq!(config.failure_policy.pulses, FailurePolicy::Surface);
  }

  #[test]
  fn test_retention_covers_longest_class() {
    let config = Config::parse(
      r#"
supabase:
  url: https://demo.supabase.co
cache:
  max_age_secs: 3600
  classes:
    song:
      max_age_secs: 604800
    pulses:
      max_age_secs: 60
"#,
    )
    .unwrap();
    assert_eq!(config.cache.retention(), Duration::from_secs(604800));

    let plain = Config::parse("supabase:\n  url: https://demo.supabase.co\n").unwrap();
    assert_eq!(plain.cache.retention(), QueryOptions::default().max_age);
  }

  #[test]
  fn test_missing_supabase_section_fails() {
    assert!(Config::parse("user_id: abc\n").is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "supabase:\n  url: http://localhost:54321\nuser_id: u1").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.user_id.as_deref(), Some("u1"));
    assert!(Config::load(Some(Path::new("/nonexistent/tuneline.yaml"))).is_err());
  }
}
