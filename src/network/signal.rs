//! Platform connectivity signals the monitor can follow.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// A boolean-valued connectivity event source.
#[async_trait]
pub trait ConnectivitySignal: Send + 'static {
  /// Read the current value.
  async fn current(&mut self) -> bool;

  /// Wait for the next change. `None` once the source is gone.
  async fn changed(&mut self) -> Option<bool>;
}

/// Signal driven by an embedder through a [`SignalHandle`].
pub struct WatchSignal {
  rx: watch::Receiver<bool>,
}

/// Sending half of a [`WatchSignal`].
#[derive(Clone)]
pub struct SignalHandle {
  tx: watch::Sender<bool>,
}

impl WatchSignal {
  pub fn new(online: bool) -> (SignalHandle, Self) {
    let (tx, rx) = watch::channel(online);
    (SignalHandle { tx }, Self { rx })
  }
}

impl SignalHandle {
  pub fn set_online(&self, online: bool) {
    self.tx.send_replace(online);
  }
}

#[async_trait]
impl ConnectivitySignal for WatchSignal {
  async fn current(&mut self) -> bool {
    *self.rx.borrow_and_update()
  }

  async fn changed(&mut self) -> Option<bool> {
    self.rx.changed().await.ok()?;
    Some(*self.rx.borrow_and_update())
  }
}

/// Reachability probe: periodically opens a TCP connection to a well-known
/// host. This is the closest thing a terminal process has to a platform
/// connectivity event.
pub struct ProbeSignal {
  addr: String,
  interval: Duration,
  timeout: Duration,
  last: Option<bool>,
}

impl ProbeSignal {
  pub fn new(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
    Self {
      addr: addr.into(),
      interval,
      timeout,
      last: None,
    }
  }

  async fn probe(&self) -> bool {
    let reachable = matches!(
      tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
      Ok(Ok(_))
    );
    debug!(addr = %self.addr, reachable, "connectivity probe");
    reachable
  }
}

#[async_trait]
impl ConnectivitySignal for ProbeSignal {
  async fn current(&mut self) -> bool {
    let online = self.probe().await;
    self.last = Some(online);
    online
  }

  async fn changed(&mut self) -> Option<bool> {
    loop {
      tokio::time::sleep(self.interval).await;
      let online = self.probe().await;
      if self.last != Some(online) {
        self.last = Some(online);
        return Some(online);
      }
    }
  }
}
