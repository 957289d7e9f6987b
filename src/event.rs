use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tuneline::cache::{CacheEvent, QueryCache};
use tuneline::network::{NetworkMonitor, NetworkStatus};
use tuneline::subscribe::Subscription;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Effective online/offline transition
  Network(NetworkStatus),
  /// A cache entry changed status
  Cache(CacheEvent),
  /// Periodic tick for query polling
  Tick,
}

/// Merges monitor and cache notifications with a tick timer into one stream
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
  subscriptions: Vec<Subscription>,
  ticker: JoinHandle<()>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration, monitor: &NetworkMonitor, cache: &QueryCache) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let network_tx = tx.clone();
    let network = monitor.subscribe(move |status| {
      let _ = network_tx.send(Event::Network(*status));
    });

    let cache_tx = tx.clone();
    let cache = cache.subscribe(move |event| {
      let _ = cache_tx.send(Event::Cache(event.clone()));
    });

    let ticker = tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self {
      rx,
      subscriptions: vec![network, cache],
      ticker,
    }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Drop for EventHandler {
  fn drop(&mut self) {
    for subscription in &self.subscriptions {
      subscription.unsubscribe();
    }
    self.ticker.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use tuneline::cache::{MemoryStorage, QueryOptions};

  #[tokio::test]
  async fn test_forwards_network_transitions() {
    let monitor = NetworkMonitor::new();
    monitor.initialize(true);
    let cache = QueryCache::open(
      Arc::new(MemoryStorage::new()),
      monitor.clone(),
      QueryOptions::default(),
    )
    .await;

    let mut events = EventHandler::new(Duration::from_secs(3600), &monitor, &cache);
    // First tick fires immediately
    assert!(matches!(events.next().await, Some(Event::Tick)));

    monitor.set_platform_online(false);
    match events.next().await {
      Some(Event::Network(status)) => {
        assert!(!status.is_online);
        assert!(status.was_offline);
      }
      other => panic!("unexpected event: {:?}", other),
    }
  }
}
