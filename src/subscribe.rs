//! Ordered listener registry shared by the network monitor and the cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
  next_id: AtomicU64,
  callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

/// A set of callbacks invoked synchronously, in registration order.
pub struct Listeners<T> {
  registry: Arc<Registry<T>>,
}

impl<T: 'static> Listeners<T> {
  pub fn new() -> Self {
    Self {
      registry: Arc::new(Registry {
        next_id: AtomicU64::new(0),
        callbacks: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut callbacks) = self.registry.callbacks.lock() {
      callbacks.push((id, Arc::new(callback)));
    }

    let registry = Arc::downgrade(&self.registry);
    Subscription {
      done: AtomicBool::new(false),
      cancel: Box::new(move || {
        if let Some(registry) = registry.upgrade() {
          if let Ok(mut callbacks) = registry.callbacks.lock() {
            callbacks.retain(|(cb_id, _)| *cb_id != id);
          }
        }
      }),
    }
  }

  /// Invoke every callback with `value`.
  ///
  /// The lock is released before calling out, so a callback may subscribe,
  /// unsubscribe, or read state that is guarded elsewhere.
  pub fn notify(&self, value: &T) {
    let snapshot: Vec<Callback<T>> = match self.registry.callbacks.lock() {
      Ok(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
      Err(_) => return,
    };

    for callback in snapshot {
      callback(value);
    }
  }

  pub fn len(&self) -> usize {
    self
      .registry
      .callbacks
      .lock()
      .map(|callbacks| callbacks.len())
      .unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: 'static> Default for Listeners<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle returned by `subscribe`. Dropping it does not unsubscribe.
pub struct Subscription {
  done: AtomicBool,
  cancel: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
  /// Remove the callback. Calling this more than once is a no-op.
  pub fn unsubscribe(&self) {
    if !self.done.swap(true, Ordering::SeqCst) {
      (self.cancel)();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("done", &self.done.load(Ordering::SeqCst))
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_notify_in_registration_order() {
    let listeners = Listeners::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a", "b", "c"] {
      let seen = seen.clone();
      let _ = listeners.subscribe(move |v| seen.lock().unwrap().push(format!("{}{}", tag, v)));
    }

    listeners.notify(&1);
    assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
  }

  #[test]
  fn test_unsubscribe_is_idempotent() {
    let listeners = Listeners::<u32>::new();
    let first = listeners.subscribe(|_| {});
    let _second = listeners.subscribe(|_| {});
    assert_eq!(listeners.len(), 2);

    first.unsubscribe();
    first.unsubscribe();
    assert_eq!(listeners.len(), 1);
  }

  #[test]
  fn test_callback_can_unsubscribe_itself() {
    let listeners = Listeners::<u32>::new();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicU64::new(0));

    let sub = {
      let slot = slot.clone();
      let calls = calls.clone();
      listeners.subscribe(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sub) = slot.lock().unwrap().as_ref() {
          sub.unsubscribe();
        }
      })
    };
    *slot.lock().unwrap() = Some(sub);

    listeners.notify(&1);
    listeners.notify(&2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(listeners.is_empty());
  }
}
