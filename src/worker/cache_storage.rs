//! Named response caches.

use std::sync::Arc;
use tracing::debug;

use super::request::Response;
use crate::error::{Result, SyncError};
use crate::store::KvStore;

const PREFIX: &str = "cache-storage:";

/// The set of named caches, each stored in its own [`KvStore`] namespace.
#[derive(Clone)]
pub struct CacheStorage {
  kv: Arc<dyn KvStore>,
}

impl CacheStorage {
  pub fn new(kv: Arc<dyn KvStore>) -> Self {
    Self { kv }
  }

  /// Open a cache by name. Caches come into existence on first write.
  pub fn open(&self, name: &str) -> NamedCache {
    NamedCache {
      kv: Arc::clone(&self.kv),
      name: name.to_string(),
      namespace: format!("{}{}", PREFIX, name),
    }
  }

  /// Names of all non-empty caches.
  pub fn keys(&self) -> Result<Vec<String>> {
    Ok(
      self
        .kv
        .namespaces()?
        .into_iter()
        .filter_map(|ns| ns.strip_prefix(PREFIX).map(String::from))
        .collect(),
    )
  }

  /// Delete a whole cache. Returns whether it had entries.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let removed = self.kv.drop_namespace(&format!("{}{}", PREFIX, name))?;
    if removed > 0 {
      debug!(cache = name, removed, "deleted cache");
    }
    Ok(removed > 0)
  }
}

/// A single named cache of responses keyed by URL.
#[derive(Clone)]
pub struct NamedCache {
  kv: Arc<dyn KvStore>,
  name: String,
  namespace: String,
}

impl NamedCache {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, url: &str) -> Result<Option<Response>> {
    match self.kv.get(&self.namespace, url)? {
      Some(bytes) => {
        let response = serde_json::from_slice(&bytes).map_err(|e| {
          SyncError::Storage(format!("Corrupt response for {} in {}: {}", url, self.name, e))
        })?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  pub fn put(&self, url: &str, response: &Response) -> Result<()> {
    let bytes = serde_json::to_vec(response)?;
    self.kv.put(&self.namespace, url, &bytes)
  }

  pub fn delete(&self, url: &str) -> Result<bool> {
    self.kv.delete(&self.namespace, url)
  }

  /// Cached URLs in key order.
  pub fn urls(&self) -> Result<Vec<String>> {
    Ok(
      self
        .kv
        .list_all(&self.namespace)?
        .into_iter()
        .map(|(url, _)| url)
        .collect(),
    )
  }
}
