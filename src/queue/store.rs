//! Queue store over a [`KvStore`] namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::notify::{BrowserEvent, EventTarget};
use crate::store::KvStore;

/// Destination key entries are queued and counted under: the URL's origin.
///
/// Opaque origins (`data:`, `file:` and the like) serialize as `"null"` and
/// could never be replayed, so they are rejected.
pub fn scope_of(url: &Url) -> Result<String> {
  let origin = url.origin();
  if !origin.is_tuple() {
    return Err(SyncError::Config(format!(
      "{} has no origin to replay against",
      url
    )));
  }
  Ok(origin.ascii_serialization())
}

/// A write waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// Assigned at enqueue time, never changes
  pub id: String,
  pub base_url: String,
  pub method: String,
  pub path: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  /// Enqueue instant (epoch ms)
  pub queued_at: i64,
  /// Tie-breaker for entries queued in the same millisecond
  pub seq: u64,
  /// Replay attempts so far, successful or not
  pub attempts: u32,
}

impl QueuedRequest {
  /// Full URL the request is replayed against.
  pub fn url(&self) -> String {
    format!(
      "{}/{}",
      self.base_url.trim_end_matches('/'),
      self.path.trim_start_matches('/')
    )
  }
}

/// A write to be queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRequest {
  pub base_url: String,
  pub method: String,
  pub path: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

impl NewRequest {
  pub fn new(
    base_url: impl Into<String>,
    method: impl Into<String>,
    path: impl Into<String>,
  ) -> Self {
    Self {
      base_url: base_url.into(),
      method: method.into(),
      path: path.into(),
      ..Default::default()
    }
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }
}

/// Persistent FIFO of pending writes.
///
/// Cloning shares the underlying storage and sequence counter.
#[derive(Clone)]
pub struct QueueStore {
  kv: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  seq: Arc<AtomicU64>,
  events: Option<Arc<EventTarget>>,
}

impl QueueStore {
  pub const NAMESPACE: &'static str = "sync-queue";

  /// Open the queue, continuing the sequence from whatever is already stored.
  pub fn open(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Result<Self> {
    let store = Self {
      kv,
      clock,
      seq: Arc::new(AtomicU64::new(0)),
      events: None,
    };

    let next = store
      .load_all()?
      .iter()
      .map(|r| r.seq + 1)
      .max()
      .unwrap_or(0);
    store.seq.store(next, Ordering::SeqCst);

    Ok(store)
  }

  /// Dispatch queue-change notifications on `target`.
  pub fn with_events(mut self, target: Arc<EventTarget>) -> Self {
    self.events = Some(target);
    self
  }

  pub fn enqueue(&self, request: NewRequest) -> Result<QueuedRequest> {
    let queued = QueuedRequest {
      id: uuid::Uuid::new_v4().to_string(),
      base_url: request.base_url,
      method: request.method.to_uppercase(),
      path: request.path,
      headers: request.headers,
      body: request.body,
      queued_at: self.clock.now_ms(),
      seq: self.seq.fetch_add(1, Ordering::SeqCst),
      attempts: 0,
    };

    self.write(&queued)?;
    debug!(id = %queued.id, url = %queued.url(), "queued request");
    self.notify(&queued.base_url)?;

    Ok(queued)
  }

  /// Pending entries ordered by `queued_at`, optionally limited to one
  /// destination.
  pub fn read_queued_requests(&self, base_url: Option<&str>) -> Result<Vec<QueuedRequest>> {
    let mut requests: Vec<QueuedRequest> = self
      .load_all()?
      .into_iter()
      .filter(|r| base_url.map_or(true, |b| r.base_url == b))
      .collect();

    requests.sort_by_key(|r| (r.queued_at, r.seq));
    Ok(requests)
  }

  pub fn get(&self, id: &str) -> Result<Option<QueuedRequest>> {
    match self.kv.get(Self::NAMESPACE, id)? {
      Some(bytes) => Ok(Some(decode(id, &bytes)?)),
      None => Ok(None),
    }
  }

  pub fn count(&self, base_url: Option<&str>) -> Result<usize> {
    Ok(self.read_queued_requests(base_url)?.len())
  }

  /// Record a replay attempt. Call before sending.
  pub fn mark_attempt(&self, id: &str) -> Result<QueuedRequest> {
    let mut bump = |bytes: &[u8]| -> Result<Vec<u8>> {
      let mut request = decode(id, bytes)?;
      request.attempts += 1;
      Ok(serde_json::to_vec(&request)?)
    };

    // Missing entries are never recreated
    match self.kv.update(Self::NAMESPACE, id, &mut bump)? {
      Some(bytes) => decode(id, &bytes),
      None => Err(SyncError::NotFound(format!("queued request {}", id))),
    }
  }

  /// Drop an entry after its replay was confirmed.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let Some(request) = self.get(id)? else {
      return Ok(false);
    };

    let removed = self.kv.delete(Self::NAMESPACE, id)?;
    if removed {
      debug!(id, "removed queued request");
      self.notify(&request.base_url)?;
    }
    Ok(removed)
  }

  /// Remove and return every entry queued more than `retention` ago.
  ///
  /// These writes are lost; the caller decides how to surface that.
  pub fn purge_expired(&self, retention: chrono::Duration) -> Result<Vec<QueuedRequest>> {
    let cutoff = self.clock.now_ms() - retention.num_milliseconds();
    let expired: Vec<QueuedRequest> = self
      .read_queued_requests(None)?
      .into_iter()
      .filter(|r| r.queued_at < cutoff)
      .collect();

    let mut touched: Vec<String> = Vec::new();
    for request in &expired {
      if self.kv.delete(Self::NAMESPACE, &request.id)? {
        warn!(
          id = %request.id,
          url = %request.url(),
          queued_at = request.queued_at,
          attempts = request.attempts,
          "dropping queued request past retention window"
        );
        if !touched.contains(&request.base_url) {
          touched.push(request.base_url.clone());
        }
      }
    }

    for base_url in &touched {
      self.notify(base_url)?;
    }

    Ok(expired)
  }

  fn write(&self, request: &QueuedRequest) -> Result<()> {
    let bytes = serde_json::to_vec(request)?;
    self.kv.put(Self::NAMESPACE, &request.id, &bytes)
  }

  fn load_all(&self) -> Result<Vec<QueuedRequest>> {
    self
      .kv
      .list_all(Self::NAMESPACE)?
      .into_iter()
      .map(|(id, bytes)| decode(&id, &bytes))
      .collect()
  }

  fn notify(&self, base_url: &str) -> Result<()> {
    if let Some(events) = &self.events {
      let count = self.count(Some(base_url))?;
      events.dispatch(BrowserEvent::QueueChanged {
        base_url: base_url.to_string(),
        count,
        timestamp: self.clock.now_ms(),
      });
    }
    Ok(())
  }
}

fn decode(id: &str, bytes: &[u8]) -> Result<QueuedRequest> {
  serde_json::from_slice(bytes)
    .map_err(|e| SyncError::Storage(format!("Corrupt queued request {}: {}", id, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{MemoryKv, SqliteKv};
  use std::sync::Mutex;

  const API: &str = "https://api.example.com";

  fn queue(clock: Arc<ManualClock>) -> QueueStore {
    QueueStore::open(Arc::new(MemoryKv::new()), clock).unwrap()
  }

  #[test]
  fn test_enqueue_assigns_bookkeeping() {
    let clock = Arc::new(ManualClock::new(1_000));
    let q = queue(clock);

    let req = q
      .enqueue(NewRequest::new(API, "post", "/api/sync").with_body(r#"{"a":1}"#))
      .unwrap();

    assert!(!req.id.is_empty());
    assert_eq!(req.method, "POST");
    assert_eq!(req.queued_at, 1_000);
    assert_eq!(req.attempts, 0);
    assert_eq!(req.url(), "https://api.example.com/api/sync");
    assert_eq!(q.get(&req.id).unwrap(), Some(req));
  }

  #[test]
  fn test_read_is_ordered_by_queued_at() {
    let clock = Arc::new(ManualClock::new(5_000));
    let q = queue(Arc::clone(&clock));

    let mut expected = Vec::new();
    for offset in [0, 0, 10, 10, 10, 250] {
      clock.set(5_000 + offset);
      expected.push(q.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap().id);
    }

    let read = q.read_queued_requests(None).unwrap();
    let ids: Vec<String> = read.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, expected);
    assert!(read.windows(2).all(|w| w[0].queued_at <= w[1].queued_at));
  }

  #[test]
  fn test_read_filters_by_base_url() {
    let q = queue(Arc::new(ManualClock::new(0)));
    q.enqueue(NewRequest::new(API, "POST", "/a")).unwrap();
    q.enqueue(NewRequest::new("https://other.example.com", "POST", "/b"))
      .unwrap();

    assert_eq!(q.count(Some(API)).unwrap(), 1);
    assert_eq!(q.count(None).unwrap(), 2);
  }

  #[test]
  fn test_mark_attempt_and_remove() {
    let q = queue(Arc::new(ManualClock::new(0)));
    let req = q.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();

    assert_eq!(q.mark_attempt(&req.id).unwrap().attempts, 1);
    assert_eq!(q.mark_attempt(&req.id).unwrap().attempts, 2);

    assert!(q.remove(&req.id).unwrap());
    assert!(!q.remove(&req.id).unwrap());
    assert!(matches!(q.mark_attempt(&req.id), Err(SyncError::NotFound(_))));
    assert_eq!(q.get(&req.id).unwrap(), None);
  }

  #[test]
  fn test_concurrent_attempts_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let clock = Arc::new(ManualClock::new(0));

    let open = |clock: Arc<ManualClock>| {
      QueueStore::open(Arc::new(SqliteKv::open(&path).unwrap()), clock).unwrap()
    };
    let page = open(clock.clone());
    let worker = open(clock);
    let req = page.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();

    std::thread::scope(|s| {
      for q in [&page, &worker] {
        let id = req.id.clone();
        s.spawn(move || {
          for _ in 0..25 {
            q.mark_attempt(&id).unwrap();
          }
        });
      }
    });

    assert_eq!(page.get(&req.id).unwrap().unwrap().attempts, 50);
  }

  #[test]
  fn test_purge_expired() {
    let clock = Arc::new(ManualClock::new(0));
    let q = queue(Arc::clone(&clock));

    let old = q.enqueue(NewRequest::new(API, "POST", "/old")).unwrap();
    clock.set(chrono::Duration::hours(20).num_milliseconds());
    let fresh = q.enqueue(NewRequest::new(API, "POST", "/fresh")).unwrap();
    clock.set(chrono::Duration::hours(25).num_milliseconds());

    let expired = q.purge_expired(chrono::Duration::hours(24)).unwrap();
    assert_eq!(expired, vec![old]);

    let remaining = q.read_queued_requests(None).unwrap();
    assert_eq!(remaining, vec![fresh]);
  }

  #[test]
  fn test_notifications_carry_destination_count() {
    let clock = Arc::new(ManualClock::new(42));
    let events = Arc::new(EventTarget::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = Arc::clone(&seen);
    events.add_listener(move |event| s.lock().unwrap().push(event.clone()));

    let q = queue(clock).with_events(events);
    let a = q.enqueue(NewRequest::new(API, "POST", "/a")).unwrap();
    q.enqueue(NewRequest::new(API, "POST", "/b")).unwrap();
    q.remove(&a.id).unwrap();

    let counts: Vec<usize> = seen
      .lock()
      .unwrap()
      .iter()
      .map(|e| match e {
        BrowserEvent::QueueChanged { count, timestamp, .. } => {
          assert_eq!(*timestamp, 42);
          *count
        }
        other => panic!("unexpected event {:?}", other),
      })
      .collect();
    assert_eq!(counts, vec![1, 2, 1]);
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let clock = Arc::new(ManualClock::new(7));

    let first = {
      let kv = Arc::new(SqliteKv::open(&path).unwrap());
      let q = QueueStore::open(kv, clock.clone()).unwrap();
      q.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap()
    };

    let kv = Arc::new(SqliteKv::open(&path).unwrap());
    let q = QueueStore::open(kv, clock).unwrap();
    let second = q.enqueue(NewRequest::new(API, "POST", "/api/sync")).unwrap();

    assert!(second.seq > first.seq);
    assert_eq!(q.read_queued_requests(Some(API)).unwrap(), vec![first, second]);
  }
}
