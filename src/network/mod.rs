//! Connectivity tracking: the status monitor, the signals it follows, and
//! the request-time offline guard.

mod monitor;
mod offline;
mod signal;

pub use monitor::{NetworkMonitor, NetworkStatus};
pub use offline::{FlagFileShell, OfflineCheck, ShellBridge, ShellStatus};
pub use signal::{ConnectivitySignal, ProbeSignal, SignalHandle, WatchSignal};
