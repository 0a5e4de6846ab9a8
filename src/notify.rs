//! Publish/subscribe plumbing.
//!
//! [`Listeners`] is an explicit subscriber registry: subscribers get a handle
//! back, can unsubscribe with it, and are notified synchronously in insertion
//! order. [`EventTarget`] is the process-wide event surface the page observes:
//! connectivity changes and queue-change notifications are dispatched on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Listeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
  next_id: u64,
  entries: Vec<(SubscriptionId, Callback<T>)>,
}

/// Ordered set of subscriber callbacks.
pub struct Listeners<T> {
  inner: Mutex<Registry<T>>,
}

impl<T> Default for Listeners<T> {
  fn default() -> Self {
    Self {
      inner: Mutex::new(Registry {
        next_id: 0,
        entries: Vec::new(),
      }),
    }
  }
}

impl<T> Listeners<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a callback. It runs after every callback registered before it.
  pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let mut registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    let id = SubscriptionId(registry.next_id);
    registry.next_id += 1;
    registry.entries.push((id, Arc::new(callback)));
    id
  }

  /// Remove a callback. Returns false if the handle was already removed.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    let before = registry.entries.len();
    registry.entries.retain(|(entry_id, _)| *entry_id != id);
    registry.entries.len() != before
  }

  pub fn len(&self) -> usize {
    self
      .inner
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .entries
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Call every subscriber with `value`.
  ///
  /// The registry lock is released before callbacks run, so a callback may
  /// subscribe or unsubscribe without deadlocking. Changes take effect from
  /// the next notification.
  pub fn notify(&self, value: &T) {
    let snapshot: Vec<Callback<T>> = {
      let registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      registry.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    };

    for callback in snapshot {
      callback(value);
    }
  }
}

/// Events observable by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
  /// Connectivity came back.
  Online,
  /// Connectivity was lost.
  Offline,
  /// The write queue for `base_url` drained or grew. `count` is what is
  /// left queued for that destination.
  QueueChanged {
    base_url: String,
    count: usize,
    timestamp: i64,
  },
}

/// Global dispatch surface for [`BrowserEvent`]s plus the synchronously
/// readable connectivity flag.
pub struct EventTarget {
  listeners: Listeners<BrowserEvent>,
  on_line: AtomicBool,
}

impl Default for EventTarget {
  fn default() -> Self {
    Self::new(true)
  }
}

impl EventTarget {
  pub fn new(on_line: bool) -> Self {
    Self {
      listeners: Listeners::new(),
      on_line: AtomicBool::new(on_line),
    }
  }

  /// The platform connectivity flag. Necessary but not sufficient for
  /// actually reaching the server.
  pub fn on_line(&self) -> bool {
    self.on_line.load(Ordering::SeqCst)
  }

  /// Flip the connectivity flag and fire the matching event if it changed.
  pub fn set_on_line(&self, on_line: bool) {
    let was = self.on_line.swap(on_line, Ordering::SeqCst);
    if was != on_line {
      self.dispatch(if on_line {
        BrowserEvent::Online
      } else {
        BrowserEvent::Offline
      });
    }
  }

  pub fn add_listener<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&BrowserEvent) + Send + Sync + 'static,
  {
    self.listeners.subscribe(callback)
  }

  pub fn remove_listener(&self, id: SubscriptionId) -> bool {
    self.listeners.unsubscribe(id)
  }

  /// Deliver an event to every listener before returning.
  pub fn dispatch(&self, event: BrowserEvent) {
    tracing::trace!(?event, "dispatching event");
    self.listeners.notify(&event);
  }
}
