//! Offline-aware read path.
//!
//! Every read goes to the network first. A success is written to the cache and
//! returned; a failure falls back to the last cached success for the same
//! request identity, and only surfaces when there is nothing cached.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::clock::Clock;
use crate::error::{Result, TransportError};
use crate::transport::{Operation, Transport};

/// Where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// Live data from the network
  Network,
  /// Last good response, served because the network failed
  Cache,
}

/// Result of [`OfflineReader::perform_read`].
#[derive(Debug)]
pub struct ReadResult {
  pub data: Value,
  pub source: ReadSource,
  /// When the cached data was fetched (cache results only)
  pub timestamp: Option<i64>,
  /// The network failure that caused the fallback (cache results only)
  pub error: Option<TransportError>,
}

impl ReadResult {
  /// Create a result from fresh network data.
  pub fn from_network(data: Value) -> Self {
    Self {
      data,
      source: ReadSource::Network,
      timestamp: None,
      error: None,
    }
  }

  /// Create a result from cached data after a network failure.
  pub fn from_cache(data: Value, timestamp: i64, error: TransportError) -> Self {
    Self {
      data,
      source: ReadSource::Cache,
      timestamp: Some(timestamp),
      error: Some(error),
    }
  }

  /// True when the UI should flag the data as possibly out of date.
  pub fn is_stale(&self) -> bool {
    self.source == ReadSource::Cache
  }
}

/// Per-read knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
  /// Serve the cached entry when the network fails. When off, failures
  /// always surface, but successes are still cached.
  pub cache_fallback: bool,
}

impl Default for ReadOptions {
  fn default() -> Self {
    Self {
      cache_fallback: true,
    }
  }
}

type ProbeFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Wraps a [`Transport`] with cache-on-success and fallback-on-failure.
#[derive(Clone)]
pub struct OfflineReader {
  transport: Arc<dyn Transport>,
  cache: CacheStore,
  clock: Arc<dyn Clock>,
  probe: Option<ProbeFn>,
}

impl OfflineReader {
  pub fn new(transport: Arc<dyn Transport>, cache: CacheStore, clock: Arc<dyn Clock>) -> Self {
    Self {
      transport,
      cache,
      clock,
      probe: None,
    }
  }

  /// Report each read's reachability (true: server answered) to `probe`.
  pub fn with_probe<F>(mut self, probe: F) -> Self
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    self.probe = Some(Arc::new(probe));
    self
  }

  pub async fn perform_read(&self, operation: &Operation, variables: &Value) -> Result<ReadResult> {
    self
      .perform_read_with(operation, variables, ReadOptions::default())
      .await
  }

  pub async fn perform_read_with(
    &self,
    operation: &Operation,
    variables: &Value,
    options: ReadOptions,
  ) -> Result<ReadResult> {
    let key = CacheKey::derive(operation, variables);

    match self.transport.send(operation, variables).await {
      Ok(data) => {
        self.report(true);
        self.cache.put(&key, data.clone(), self.clock.now_ms())?;
        Ok(ReadResult::from_network(data))
      }
      Err(error) => {
        self.report(!error.is_unreachable());

        if !options.cache_fallback {
          return Err(error.into());
        }

        // Cache is read-only on this path
        match self.cache.get(&key)? {
          Some(entry) => {
            warn!(
              operation = operation.label(),
              %error,
              cached_at = entry.timestamp,
              "network read failed, serving cached data"
            );
            Ok(ReadResult::from_cache(entry.value, entry.timestamp, error))
          }
          None => {
            debug!(
              operation = operation.label(),
              %error,
              "network read failed with no cached data"
            );
            Err(error.into())
          }
        }
      }
    }
  }

  fn report(&self, reachable: bool) {
    if let Some(probe) = &self.probe {
      probe(reachable);
    }
  }
}
