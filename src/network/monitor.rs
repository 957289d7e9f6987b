//! Online/offline status tracking.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::signal::ConnectivitySignal;
use crate::subscribe::{Listeners, Subscription};

/// Snapshot of the monitor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
  /// Effective reachability: platform signal and no simulated-offline override.
  pub is_online: bool,
  /// Set on the first offline transition of the session, never reset.
  pub was_offline: bool,
  /// False until the first connectivity reading has completed.
  pub is_initialized: bool,
}

impl Default for NetworkStatus {
  fn default() -> Self {
    // Unknown connectivity is treated as online until the first reading.
    Self {
      is_online: true,
      was_offline: false,
      is_initialized: false,
    }
  }
}

#[derive(Debug)]
struct MonitorState {
  platform_online: bool,
  simulated_offline: bool,
  status: NetworkStatus,
}

impl MonitorState {
  fn effective_online(&self) -> bool {
    self.platform_online && !self.simulated_offline
  }

  /// Recompute the status. Returns the new snapshot when `is_online` flipped.
  fn apply(&mut self) -> Option<NetworkStatus> {
    let online = self.effective_online();
    if online == self.status.is_online {
      return None;
    }

    self.status.is_online = online;
    if !online {
      self.status.was_offline = true;
    }
    Some(self.status)
  }
}

struct Inner {
  state: Mutex<MonitorState>,
  listeners: Listeners<NetworkStatus>,
}

/// Observes the platform connectivity signal and the shell's
/// simulated-offline override. Makes no network calls of its own.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct NetworkMonitor {
  inner: Arc<Inner>,
}

impl NetworkMonitor {
  /// Create an uninitialized monitor. Call [`NetworkMonitor::start`] to
  /// attach a signal, or drive it by hand with
  /// [`NetworkMonitor::set_platform_online`].
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(MonitorState {
          platform_online: true,
          simulated_offline: false,
          status: NetworkStatus::default(),
        }),
        listeners: Listeners::new(),
      }),
    }
  }

  /// Current status snapshot.
  pub fn status(&self) -> NetworkStatus {
    self
      .inner
      .state
      .lock()
      .map(|state| state.status)
      .unwrap_or_default()
  }

  pub fn is_online(&self) -> bool {
    self.status().is_online
  }

  /// Register a callback for online/offline transitions.
  ///
  /// Callbacks run synchronously on the thread that observed the transition,
  /// in registration order.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&NetworkStatus) + Send + Sync + 'static,
  {
    self.inner.listeners.subscribe(callback)
  }

  /// Seed the status from `signal` and keep following it in a background task.
  ///
  /// Returns once the first reading is in, so `is_initialized` is true by
  /// the time this resolves.
  pub async fn start<S: ConnectivitySignal>(&self, mut signal: S) {
    let online = signal.current().await;
    self.initialize(online);

    let monitor = self.clone();
    tokio::spawn(async move {
      while let Some(online) = signal.changed().await {
        monitor.set_platform_online(online);
      }
      debug!("connectivity signal closed");
    });
  }

  /// Record the first connectivity reading.
  pub fn initialize(&self, online: bool) {
    let changed = {
      let Ok(mut state) = self.inner.state.lock() else {
        warn!("network monitor lock poisoned");
        return;
      };
      state.platform_online = online;
      state.status.is_initialized = true;
      let changed = state.apply();
      // A session that boots offline counts as having been offline.
      if !state.effective_online() {
        state.status.was_offline = true;
      }
      changed
    };

    info!(online, "network status initialized");
    if let Some(status) = changed {
      self.inner.listeners.notify(&status);
    }
  }

  /// Platform connectivity changed. Counts as a connectivity reading.
  pub fn set_platform_online(&self, online: bool) {
    self.update(|state| {
      state.platform_online = online;
      state.status.is_initialized = true;
    });
  }

  /// Shell override: force offline regardless of the platform signal. Does
  /// not initialize the monitor.
  pub fn set_simulated_offline(&self, offline: bool) {
    self.update(|state| state.simulated_offline = offline);
  }

  fn update(&self, mutate: impl FnOnce(&mut MonitorState)) {
    let changed = {
      let Ok(mut state) = self.inner.state.lock() else {
        warn!("network monitor lock poisoned");
        return;
      };
      mutate(&mut state);
      state.apply()
    };

    if let Some(status) = changed {
      if status.is_online {
        info!("network: online");
      } else {
        info!("network: offline");
      }
      self.inner.listeners.notify(&status);
    }
  }
}

impl Default for NetworkMonitor {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for NetworkMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NetworkMonitor")
      .field("status", &self.status())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::network::signal::WatchSignal;
  use std::time::Duration;

  #[test]
  fn test_uninitialized_defaults() {
    let monitor = NetworkMonitor::new();
    let status = monitor.status();
    assert!(status.is_online);
    assert!(!status.was_offline);
    assert!(!status.is_initialized);
  }

  #[test]
  fn test_was_offline_is_sticky() {
    let monitor = NetworkMonitor::new();
    monitor.initialize(true);
    assert!(!monitor.status().was_offline);

    monitor.set_platform_online(false);
    assert!(monitor.status().was_offline);

    for _ in 0..3 {
      monitor.set_platform_online(true);
      assert!(monitor.status().was_offline);
      monitor.set_platform_online(false);
      assert!(monitor.status().was_offline);
    }
  }

  #[test]
  fn test_booting_offline_sets_was_offline() {
    let monitor = NetworkMonitor::new();
    monitor.initialize(false);
    let status = monitor.status();
    assert!(!status.is_online);
    assert!(status.was_offline);
    assert!(status.is_initialized);
  }

  #[test]
  fn test_subscribers_see_transitions_in_order() {
    let monitor = NetworkMonitor::new();
    monitor.initialize(true);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = {
      let seen = seen.clone();
      monitor.subscribe(move |s| seen.lock().unwrap().push(("first", s.is_online)))
    };
    let _second = {
      let seen = seen.clone();
      monitor.subscribe(move |s| seen.lock().unwrap().push(("second", s.is_online)))
    };

    monitor.set_platform_online(false);
    // No transition, no notification
    monitor.set_platform_online(false);
    first.unsubscribe();
    monitor.set_platform_online(true);

    assert_eq!(
      *seen.lock().unwrap(),
      vec![("first", false), ("second", false), ("second", true)]
    );
  }

  #[test]
  fn test_simulated_offline_overrides_platform() {
    let monitor = NetworkMonitor::new();
    monitor.initialize(true);

    monitor.set_simulated_offline(true);
    assert!(!monitor.is_online());

    // Platform flapping does not bring us back while the override is active
    monitor.set_platform_online(false);
    monitor.set_platform_online(true);
    assert!(!monitor.is_online());

    monitor.set_simulated_offline(false);
    assert!(monitor.is_online());
    assert!(monitor.status().was_offline);
  }

  #[test]
  fn test_override_before_first_reading_stays_uninitialized() {
    let monitor = NetworkMonitor::new();
    monitor.set_simulated_offline(true);
    let status = monitor.status();
    assert!(!status.is_online);
    assert!(!status.is_initialized);

    monitor.initialize(true);
    let status = monitor.status();
    assert!(status.is_initialized);
    assert!(!status.is_online);
  }

  #[tokio::test]
  async fn test_start_initializes_and_follows_signal() {
    let (handle, signal) = WatchSignal::new(true);
    let monitor = NetworkMonitor::new();
    assert!(!monitor.status().is_initialized);

    monitor.start(signal).await;
    assert!(monitor.status().is_initialized);
    assert!(monitor.is_online());

    handle.set_online(false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!monitor.is_online());
    assert!(monitor.status().was_offline);

    handle.set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(monitor.is_online());
    assert!(monitor.status().is_initialized);
  }
}
