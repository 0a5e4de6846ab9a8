//! Abstract durable key-value storage.
//!
//! Both the response cache and the write queue persist through a [`KvStore`].
//! Every method is a single atomic storage operation; callers never hold a
//! lock across calls, so a store can be shared by the page-side read path and
//! the worker-side sync controller at the same time.

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use crate::error::Result;

/// Namespaced key-value store.
///
/// Namespaces isolate owners: the cache store, the queue store and every named
/// response cache each get their own.
pub trait KvStore: Send + Sync {
  /// Read a value.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

  /// Insert or overwrite a value.
  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

  /// Overwrite a value only if the key still exists. Returns whether it did.
  fn replace(&self, namespace: &str, key: &str, value: &[u8]) -> Result<bool>;

  /// Read-modify-write a value as one atomic operation. `change` receives the
  /// stored value and returns its replacement. Returns the new value, or
  /// `None` without writing if the key does not exist.
  fn update(
    &self,
    namespace: &str,
    key: &str,
    change: &mut dyn FnMut(&[u8]) -> Result<Vec<u8>>,
  ) -> Result<Option<Vec<u8>>>;

  /// Delete a value. Returns whether a value was removed.
  fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

  /// All entries of a namespace, ordered by key.
  fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>>;

  /// Names of all non-empty namespaces.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Remove a whole namespace. Returns the number of entries removed.
  fn drop_namespace(&self, namespace: &str) -> Result<usize>;
}
