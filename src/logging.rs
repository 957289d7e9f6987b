//! File logging. Stdout belongs to command output, so everything goes to a
//! daily rolling file.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_ENV: &str = "TUNELINE_LOG";

/// Install the global subscriber. Keep the returned guard alive until exit or
/// buffered lines are lost.
pub fn init_logging(config: &LogConfig) -> Result<WorkerGuard> {
  let log_dir = log_dir(config)?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = rolling::daily(&log_dir, "tuneline.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_target(true);

  tracing_subscriber::registry()
    .with(env_filter(&config.level))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn env_filter(fallback: &str) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn log_dir(config: &LogConfig) -> Result<PathBuf> {
  if let Some(dir) = &config.dir {
    return Ok(dir.clone());
  }
  let data_dir = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("tuneline").join("logs"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_dir_wins() {
    let config = LogConfig {
      level: "debug".into(),
      dir: Some(PathBuf::from("/tmp/tuneline-logs")),
    };
    assert_eq!(log_dir(&config).unwrap(), PathBuf::from("/tmp/tuneline-logs"));
  }

  #[test]
  fn test_fallback_filter_parses() {
    let filter = env_filter("tuneline=debug,reqwest=warn");
    assert!(!filter.to_string().is_empty());
  }
}
