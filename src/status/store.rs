use std::sync::Mutex;

use crate::notify::{Listeners, SubscriptionId};

/// Derived connectivity and sync state. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineStatus {
  pub is_online: bool,
  /// Outstanding writes as of the last hydration or queue notification
  pub queued_count: usize,
  /// Timestamp of the last queue notification this session
  pub last_synced_at: Option<i64>,
}

impl OfflineStatus {
  /// Writes were accepted locally but not yet confirmed by the server.
  pub fn has_pending_writes(&self) -> bool {
    self.queued_count > 0
  }
}

/// Reactive holder for [`OfflineStatus`].
///
/// Readers get snapshots and change notifications; writes go through the
/// coordinator.
#[derive(Default)]
pub struct StatusStore {
  state: Mutex<OfflineStatus>,
  listeners: Listeners<OfflineStatus>,
}

impl StatusStore {
  pub fn new(initial: OfflineStatus) -> Self {
    Self {
      state: Mutex::new(initial),
      listeners: Listeners::new(),
    }
  }

  pub fn get(&self) -> OfflineStatus {
    self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Called with the new snapshot after every change, before the mutating
  /// call returns.
  pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&OfflineStatus) + Send + Sync + 'static,
  {
    self.listeners.subscribe(callback)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.listeners.unsubscribe(id)
  }

  /// Apply `change`. Subscribers hear about it only if something differs.
  pub(crate) fn update<F>(&self, change: F) -> bool
  where
    F: FnOnce(&mut OfflineStatus),
  {
    let snapshot = {
      let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
      let before = state.clone();
      change(&mut state);
      if *state == before {
        return false;
      }
      state.clone()
    };

    tracing::debug!(
      is_online = snapshot.is_online,
      queued = snapshot.queued_count,
      "offline status changed"
    );
    self.listeners.notify(&snapshot);
    true
  }
}
