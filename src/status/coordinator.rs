//! Keeps [`StatusStore`] in step with connectivity and the write queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use super::store::{OfflineStatus, StatusStore};
use crate::error::{Result, SyncError};
use crate::notify::{BrowserEvent, EventTarget, SubscriptionId};
use crate::queue::{scope_of, QueueStore};

/// Owns the reactive status for one session.
///
/// Reads the queue once at initialization and is event-driven afterwards. It
/// never polls and never probes the network on its own.
pub struct OfflineStatusCoordinator {
  status: Arc<StatusStore>,
  queue: QueueStore,
  events: Arc<EventTarget>,
  subscription: Mutex<Option<SubscriptionId>>,
}

impl OfflineStatusCoordinator {
  pub fn new(queue: QueueStore, events: Arc<EventTarget>) -> Self {
    Self {
      status: Arc::new(StatusStore::new(OfflineStatus::default())),
      queue,
      events,
      subscription: Mutex::new(None),
    }
  }

  /// Read-only handle for the UI layer.
  pub fn status(&self) -> Arc<StatusStore> {
    Arc::clone(&self.status)
  }

  /// Hydrate from the queue and start listening. Only the first call per
  /// session does anything; later calls return `Ok(false)`.
  ///
  /// `base_url` is reduced to its origin, the key writes are queued under.
  pub fn initialize_offline_status_listeners(&self, base_url: &str) -> Result<bool> {
    let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
    if subscription.is_some() {
      debug!(base_url, "offline status listeners already initialized");
      return Ok(false);
    }

    let url = Url::parse(base_url)
      .map_err(|e| SyncError::Config(format!("invalid base url {}: {}", base_url, e)))?;
    let scope = scope_of(&url)?;

    // Subscribe before reading so no change is missed. A change that lands
    // after the read carries a newer count than the read, so once one has
    // been applied the hydrated count is discarded.
    let changed = Arc::new(AtomicBool::new(false));
    let status = Arc::clone(&self.status);
    let listener_changed = Arc::clone(&changed);
    let listener_scope = scope.clone();
    let id = self.events.add_listener(move |event| match event {
      BrowserEvent::Online => {
        status.update(|s| s.is_online = true);
      }
      BrowserEvent::Offline => {
        status.update(|s| s.is_online = false);
      }
      BrowserEvent::QueueChanged {
        base_url,
        count,
        timestamp,
      } if *base_url == listener_scope => {
        listener_changed.store(true, Ordering::SeqCst);
        status.update(|s| {
          s.queued_count = *count;
          s.last_synced_at = Some(*timestamp);
        });
      }
      BrowserEvent::QueueChanged { .. } => {}
    });

    let queued = match self.queue.count(Some(&scope)) {
      Ok(count) => count,
      Err(e) => {
        self.events.remove_listener(id);
        warn!(scope = %scope, error = %e, "failed to hydrate offline status");
        return Err(e);
      }
    };

    let on_line = self.events.on_line();
    self.status.update(|s| {
      s.is_online = on_line;
      // Checked under the status lock: a change applied later overwrites us
      if !changed.load(Ordering::SeqCst) {
        s.queued_count = queued;
      }
    });
    *subscription = Some(id);

    info!(scope = %scope, queued, on_line, "offline status initialized");
    Ok(true)
  }

  /// Correct `is_online` with the outcome of a real request.
  pub fn record_probe(&self, reachable: bool) {
    if self.status.update(|s| s.is_online = reachable) {
      debug!(reachable, "connectivity corrected by probe");
    }
  }

  /// Stop listening. The status keeps its last value.
  pub fn detach(&self) -> bool {
    let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
    match subscription.take() {
      Some(id) => self.events.remove_listener(id),
      None => false,
    }
  }
}

impl Drop for OfflineStatusCoordinator {
  fn drop(&mut self) {
    self.detach();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::queue::NewRequest;
  use crate::store::{KvStore, MemoryKv};

  const API: &str = "https://api.example.com";

  struct Session {
    clock: Arc<ManualClock>,
    events: Arc<EventTarget>,
    queue: QueueStore,
  }

  fn session(on_line: bool) -> Session {
    let clock = Arc::new(ManualClock::new(1_000));
    let events = Arc::new(EventTarget::new(on_line));
    let queue = QueueStore::open(Arc::new(MemoryKv::new()), clock.clone())
      .unwrap()
      .with_events(Arc::clone(&events));
    Session {
      clock,
      events,
      queue,
    }
  }

  #[test]
  fn test_hydrates_from_queue_scope() {
    let s = session(false);
    s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();
    s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();
    s.queue
      .enqueue(NewRequest::new("https://other.example.com", "POST", "/api/sync"))
      .unwrap();

    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    assert!(coordinator.initialize_offline_status_listeners(API).unwrap());

    assert_eq!(
      coordinator.status().get(),
      OfflineStatus {
        is_online: false,
        queued_count: 2,
        last_synced_at: None,
      }
    );
  }

  #[test]
  fn test_queue_notification_sets_count_and_time() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    coordinator.initialize_offline_status_listeners(API).unwrap();

    s.events.dispatch(BrowserEvent::QueueChanged {
      base_url: API.into(),
      count: 0,
      timestamp: 42_000,
    });
    let status = coordinator.status().get();
    assert_eq!(status.queued_count, 0);
    assert_eq!(status.last_synced_at, Some(42_000));

    s.clock.set(50_000);
    let queued = s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();
    assert_eq!(coordinator.status().get().queued_count, 1);

    s.clock.set(60_000);
    s.queue.remove(&queued.id).unwrap();
    let status = coordinator.status().get();
    assert_eq!(status.queued_count, 0);
    assert_eq!(status.last_synced_at, Some(60_000));
  }

  #[test]
  fn test_ignores_other_destinations() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    coordinator.initialize_offline_status_listeners(API).unwrap();

    s.queue
      .enqueue(NewRequest::new("https://other.example.com", "POST", "/x"))
      .unwrap();
    let status = coordinator.status().get();
    assert_eq!(status.queued_count, 0);
    assert_eq!(status.last_synced_at, None);
  }

  #[test]
  fn test_mirrors_connectivity_events() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    coordinator.initialize_offline_status_listeners(API).unwrap();
    let status = coordinator.status();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&seen);
    status.subscribe(move |st| r.lock().unwrap().push(st.is_online));

    s.events.set_on_line(false);
    assert!(!status.get().is_online);
    s.events.set_on_line(true);
    assert!(status.get().is_online);

    assert_eq!(*seen.lock().unwrap(), vec![false, true]);
  }

  #[test]
  fn test_initialize_once_per_session() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    assert!(coordinator.initialize_offline_status_listeners(API).unwrap());
    assert!(!coordinator.initialize_offline_status_listeners(API).unwrap());

    let notifications = Arc::new(Mutex::new(0));
    let n = Arc::clone(&notifications);
    coordinator.status().subscribe(move |_| *n.lock().unwrap() += 1);

    s.events.set_on_line(false);
    assert_eq!(*notifications.lock().unwrap(), 1);

    assert!(coordinator.detach());
    s.events.set_on_line(true);
    assert!(!coordinator.status().get().is_online);
  }

  #[test]
  fn test_reload_rehydrates() {
    let s = session(true);
    s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();

    let first = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    first.initialize_offline_status_listeners(API).unwrap();
    drop(first);

    // Queue drained while no page was listening
    for r in s.queue.read_queued_requests(None).unwrap() {
      s.queue.remove(&r.id).unwrap();
    }

    let second = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    second.initialize_offline_status_listeners(API).unwrap();
    assert_eq!(second.status().get().queued_count, 0);
  }

  /// Store that lets a queue change land right after the queue is listed.
  #[derive(Default)]
  struct RacingKv {
    inner: MemoryKv,
    after_list: Mutex<Option<Arc<EventTarget>>>,
  }

  impl KvStore for RacingKv {
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
      self.inner.get(ns, key)
    }
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()> {
      self.inner.put(ns, key, value)
    }
    fn replace(&self, ns: &str, key: &str, value: &[u8]) -> Result<bool> {
      self.inner.replace(ns, key, value)
    }
    fn update(
      &self,
      ns: &str,
      key: &str,
      change: &mut dyn FnMut(&[u8]) -> Result<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
      self.inner.update(ns, key, change)
    }
    fn delete(&self, ns: &str, key: &str) -> Result<bool> {
      self.inner.delete(ns, key)
    }
    fn list_all(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
      let entries = self.inner.list_all(ns)?;
      if let Some(events) = self.after_list.lock().unwrap().take() {
        events.dispatch(BrowserEvent::QueueChanged {
          base_url: API.into(),
          count: 5,
          timestamp: 777,
        });
      }
      Ok(entries)
    }
    fn namespaces(&self) -> Result<Vec<String>> {
      self.inner.namespaces()
    }
    fn drop_namespace(&self, ns: &str) -> Result<usize> {
      self.inner.drop_namespace(ns)
    }
  }

  #[test]
  fn test_change_during_hydration_wins() {
    let kv = Arc::new(RacingKv::default());
    let events = Arc::new(EventTarget::new(false));
    let queue = QueueStore::open(kv.clone(), Arc::new(ManualClock::new(0))).unwrap();
    *kv.after_list.lock().unwrap() = Some(Arc::clone(&events));

    let coordinator = OfflineStatusCoordinator::new(queue, events);
    coordinator.initialize_offline_status_listeners(API).unwrap();

    assert_eq!(
      coordinator.status().get(),
      OfflineStatus {
        is_online: false,
        queued_count: 5,
        last_synced_at: Some(777),
      }
    );
  }

  #[test]
  fn test_scope_is_normalized_to_origin() {
    let s = session(true);
    s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();

    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    coordinator
      .initialize_offline_status_listeners("https://api.example.com/app/")
      .unwrap();
    assert_eq!(coordinator.status().get().queued_count, 1);

    s.queue.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();
    assert_eq!(coordinator.status().get().queued_count, 2);
  }

  #[test]
  fn test_rejects_unusable_scope() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());

    assert!(coordinator.initialize_offline_status_listeners("not a url").is_err());
    assert!(coordinator
      .initialize_offline_status_listeners("data:text/plain,x")
      .is_err());
    // A failed attempt does not use up the session's initialization
    assert!(coordinator.initialize_offline_status_listeners(API).unwrap());
  }

  #[test]
  fn test_probe_corrects_flag() {
    let s = session(true);
    let coordinator = OfflineStatusCoordinator::new(s.queue.clone(), s.events.clone());
    coordinator.initialize_offline_status_listeners(API).unwrap();

    coordinator.record_probe(false);
    assert!(!coordinator.status().get().is_online);
    assert!(s.events.on_line());

    coordinator.record_probe(true);
    assert!(coordinator.status().get().is_online);
  }
}
