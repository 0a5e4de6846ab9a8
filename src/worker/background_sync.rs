//! Durable retry of failed writes.
//!
//! Requests that fail to reach the network are persisted in the
//! [`QueueStore`] and replayed when connectivity returns or the platform fires
//! a sync event. Replay keeps `queued_at` order per destination: once a write
//! to a destination fails, later writes to that destination wait for the next
//! round. Entries older than the retention window are dropped and lost.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::request::Request;
use crate::error::{Result, SyncError};
use crate::queue::{NewRequest, QueueStore, QueuedRequest};
use crate::transport::Fetcher;

/// How long a queued write is retried before it is dropped.
pub const DEFAULT_RETENTION_MINUTES: i64 = 24 * 60;

/// Outcome of one replay round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
  /// Delivered and removed from the queue
  pub replayed: Vec<QueuedRequest>,
  /// Attempted and still queued
  pub failed: Vec<QueuedRequest>,
  /// Dropped because they outlived the retention window
  pub expired: Vec<QueuedRequest>,
  /// Dropped because they do not form a sendable request
  pub rejected: Vec<QueuedRequest>,
}

impl ReplayReport {
  /// True when nothing is left to retry from this round.
  pub fn is_drained(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Named background-sync queue over the shared [`QueueStore`].
#[derive(Clone)]
pub struct BackgroundSyncQueue {
  name: String,
  queue: QueueStore,
  retention: chrono::Duration,
  replaying: Arc<Mutex<()>>,
}

impl BackgroundSyncQueue {
  pub fn new(name: impl Into<String>, queue: QueueStore) -> Self {
    Self {
      name: name.into(),
      queue,
      retention: chrono::Duration::minutes(DEFAULT_RETENTION_MINUTES),
      replaying: Arc::new(Mutex::new(())),
    }
  }

  pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
    self.retention = retention;
    self
  }

  /// Sync tag this queue answers to.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn retention(&self) -> chrono::Duration {
    self.retention
  }

  pub fn store(&self) -> &QueueStore {
    &self.queue
  }

  /// Persist a request whose network attempt failed.
  pub fn push(&self, request: &Request) -> Result<QueuedRequest> {
    let queued = self.queue.enqueue(NewRequest {
      base_url: request.origin()?,
      method: request.method.clone(),
      path: request.path_and_query(),
      headers: request.headers.clone(),
      body: request.body.clone(),
    })?;
    info!(
      queue = %self.name,
      id = %queued.id,
      url = %queued.url(),
      "write queued for background sync"
    );
    Ok(queued)
  }

  /// Replay everything currently queued.
  ///
  /// Only one replay runs at a time per queue; a second caller waits for the
  /// first to finish and then replays whatever is left.
  pub async fn replay(&self, fetcher: &dyn Fetcher) -> Result<ReplayReport> {
    let _guard = self.replaying.lock().await;

    let mut report = ReplayReport {
      expired: self.queue.purge_expired(self.retention)?,
      ..Default::default()
    };

    let mut blocked: HashSet<String> = HashSet::new();

    for entry in self.queue.read_queued_requests(None)? {
      if blocked.contains(&entry.base_url) {
        continue;
      }

      let entry = match self.queue.mark_attempt(&entry.id) {
        Ok(entry) => entry,
        // Replayed and removed by another context meanwhile
        Err(SyncError::NotFound(_)) => continue,
        Err(e) => return Err(e),
      };

      let mut request = match Request::new(&entry.method, &entry.url()) {
        Ok(request) => request,
        Err(error) => {
          // Never sendable; keeping it would only hold up the rest
          warn!(
            id = %entry.id,
            url = %entry.url(),
            %error,
            "dropping unreplayable queued request"
          );
          self.queue.remove(&entry.id)?;
          report.rejected.push(entry);
          continue;
        }
      };
      request.headers = entry.headers.clone();
      request.body = entry.body.clone();

      match fetcher.fetch(&request).await {
        Ok(response) if response.status >= 500 => {
          warn!(
            id = %entry.id,
            status = response.status,
            attempts = entry.attempts,
            "replay failed, will retry"
          );
          blocked.insert(entry.base_url.clone());
          report.failed.push(entry);
        }
        Ok(response) => {
          if !response.is_success() {
            // The server answered; retrying the same body cannot change that.
            warn!(id = %entry.id, status = response.status, "replayed write was rejected");
          }
          self.queue.remove(&entry.id)?;
          debug!(id = %entry.id, status = response.status, "replayed queued request");
          report.replayed.push(entry);
        }
        Err(error) => {
          warn!(id = %entry.id, %error, attempts = entry.attempts, "replay failed, will retry");
          blocked.insert(entry.base_url.clone());
          report.failed.push(entry);
        }
      }
    }

    info!(
      queue = %self.name,
      replayed = report.replayed.len(),
      failed = report.failed.len(),
      expired = report.expired.len(),
      rejected = report.rejected.len(),
      "replay finished"
    );

    Ok(report)
  }
}
