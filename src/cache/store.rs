//! Cache store over a [`KvStore`] namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::key::CacheKey;
use crate::error::{Result, SyncError};
use crate::store::KvStore;

/// Last successful response for a request identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  /// Response payload, opaque to the cache
  pub value: Value,
  /// When the network returned it (epoch ms)
  pub timestamp: i64,
}

/// Persistent response cache.
///
/// Entries are never deleted here; eviction is somebody else's policy.
#[derive(Clone)]
pub struct CacheStore {
  kv: Arc<dyn KvStore>,
  namespace: String,
  monotonic: bool,
}

impl CacheStore {
  pub const DEFAULT_NAMESPACE: &'static str = "graphql-cache";

  pub fn new(kv: Arc<dyn KvStore>) -> Self {
    Self {
      kv,
      namespace: Self::DEFAULT_NAMESPACE.to_string(),
      monotonic: false,
    }
  }

  /// Use a different namespace, e.g. one per signed-in account.
  pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = namespace.into();
    self
  }

  /// Reject writes older than what is already stored.
  pub fn with_monotonic_writes(mut self, monotonic: bool) -> Self {
    self.monotonic = monotonic;
    self
  }

  pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    match self.kv.get(&self.namespace, key.as_str())? {
      Some(bytes) => {
        let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| {
          SyncError::Storage(format!("Corrupt cache entry {}: {}", key, e))
        })?;
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  /// Store a successful response. Returns false if a monotonic store kept a
  /// newer entry instead.
  pub fn put(&self, key: &CacheKey, value: Value, timestamp: i64) -> Result<bool> {
    if self.monotonic {
      if let Some(existing) = self.get(key)? {
        if timestamp < existing.timestamp {
          debug!(%key, timestamp, existing = existing.timestamp, "skipping older cache write");
          return Ok(false);
        }
      }
    }

    let entry = CacheEntry {
      key: key.as_str().to_string(),
      value,
      timestamp,
    };
    let bytes = serde_json::to_vec(&entry)?;
    self.kv.put(&self.namespace, key.as_str(), &bytes)?;
    debug!(%key, timestamp, "cached response");
    Ok(true)
  }

  /// Every cached entry, in key order.
  pub fn entries(&self) -> Result<Vec<CacheEntry>> {
    self
      .kv
      .list_all(&self.namespace)?
      .into_iter()
      .map(|(key, bytes)| {
        serde_json::from_slice(&bytes)
          .map_err(|e| SyncError::Storage(format!("Corrupt cache entry {}: {}", key, e)))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryKv;
  use crate::transport::Operation;
  use serde_json::json;

  fn key() -> CacheKey {
    CacheKey::derive(&Operation::new("query Q { q }"), &json!({"id": 1}))
  }

  #[test]
  fn test_put_overwrites() {
    let cache = CacheStore::new(Arc::new(MemoryKv::new()));
    assert_eq!(cache.get(&key()).unwrap(), None);

    cache.put(&key(), json!({"v": 1}), 100).unwrap();
    cache.put(&key(), json!({"v": 2}), 50).unwrap();

    let entry = cache.get(&key()).unwrap().unwrap();
    assert_eq!(entry.value, json!({"v": 2}));
    assert_eq!(entry.timestamp, 50);
  }

  #[test]
  fn test_monotonic_keeps_newer_entry() {
    let cache = CacheStore::new(Arc::new(MemoryKv::new())).with_monotonic_writes(true);

    assert!(cache.put(&key(), json!({"v": 1}), 100).unwrap());
    assert!(!cache.put(&key(), json!({"v": 2}), 50).unwrap());
    assert!(cache.put(&key(), json!({"v": 3}), 100).unwrap());

    let entry = cache.get(&key()).unwrap().unwrap();
    assert_eq!(entry.value, json!({"v": 3}));
  }

  #[test]
  fn test_corrupt_entry_is_storage_error() {
    let kv = Arc::new(MemoryKv::new());
    kv.put(CacheStore::DEFAULT_NAMESPACE, key().as_str(), b"not json")
      .unwrap();

    let cache = CacheStore::new(kv);
    assert!(matches!(cache.get(&key()), Err(SyncError::Storage(_))));
  }
}
