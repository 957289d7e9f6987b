//! Request-time offline guard.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::monitor::NetworkMonitor;
use crate::cache::Outcome;
use crate::error::FetchError;

/// Answer from the embedding shell's connectivity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellStatus {
  pub is_offline: bool,
}

/// Authoritative connectivity query exposed by a desktop shell.
#[async_trait]
pub trait ShellBridge: Send + Sync {
  async fn connectivity(&self) -> Result<ShellStatus>;
}

/// Shell bridge backed by an "airplane mode" flag file: offline while the
/// file exists.
#[derive(Debug, Clone)]
pub struct FlagFileShell {
  path: PathBuf,
}

impl FlagFileShell {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[async_trait]
impl ShellBridge for FlagFileShell {
  async fn connectivity(&self) -> Result<ShellStatus> {
    let is_offline = tokio::fs::try_exists(&self.path)
      .await
      .map_err(|e| eyre!("Failed to check offline flag {}: {}", self.path.display(), e))?;
    Ok(ShellStatus { is_offline })
  }
}

/// Combines the monitor with an optional shell bridge.
///
/// The shell can only make the answer more offline: a shell reporting
/// online never overrides a monitor reporting offline.
#[derive(Clone)]
pub struct OfflineCheck {
  monitor: NetworkMonitor,
  shell: Option<Arc<dyn ShellBridge>>,
}

impl OfflineCheck {
  pub fn new(monitor: NetworkMonitor) -> Self {
    Self {
      monitor,
      shell: None,
    }
  }

  pub fn with_shell(mut self, shell: Arc<dyn ShellBridge>) -> Self {
    self.shell = Some(shell);
    self
  }

  pub fn monitor(&self) -> &NetworkMonitor {
    &self.monitor
  }

  pub async fn is_offline(&self) -> bool {
    if !self.monitor.is_online() {
      return true;
    }

    match &self.shell {
      Some(shell) => match shell.connectivity().await {
        Ok(status) => status.is_offline,
        Err(e) => {
          warn!("shell connectivity query failed: {}", e);
          false
        }
      },
      None => false,
    }
  }

  /// Run `fetch` unless we are offline, in which case it is never polled and
  /// the attempt resolves to [`Outcome::Skipped`].
  pub async fn guard<T, Fut>(&self, fetch: Fut) -> std::result::Result<Outcome<T>, FetchError>
  where
    Fut: Future<Output = std::result::Result<T, FetchError>>,
  {
    if self.is_offline().await {
      debug!("offline, skipping network call");
      return Ok(Outcome::Skipped);
    }
    fetch.await.map(Outcome::Ready)
  }
}
