//! SQLite-backed key-value store.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::KvStore;
use crate::error::{Result, SyncError};

/// Schema for the key-value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_entries_namespace ON kv_entries(namespace);
"#;

/// Durable [`KvStore`] stored in a single SQLite file.
///
/// Survives process restarts, which is what makes queued writes outlive a
/// page reload.
pub struct SqliteKv {
  conn: Mutex<Connection>,
}

impl SqliteKv {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::Storage(format!("Failed to create storage directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Storage("Could not determine data directory".into()))?;

    Ok(data_dir.join("offline-sync").join("offline.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // Other processes may hold the write lock briefly
    conn.busy_timeout(Duration::from_secs(5))?;
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| SyncError::Storage(format!("Failed to run storage migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl KvStore for SqliteKv {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_entries WHERE namespace = ? AND key = ?",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_entries (namespace, key, value, updated_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![namespace, key, value],
    )?;
    Ok(())
  }

  fn replace(&self, namespace: &str, key: &str, value: &[u8]) -> Result<bool> {
    let conn = self.lock()?;
    let changed = conn.execute(
      "UPDATE kv_entries SET value = ?, updated_at = datetime('now')
       WHERE namespace = ? AND key = ?",
      params![value, namespace, key],
    )?;
    Ok(changed > 0)
  }

  fn update(
    &self,
    namespace: &str,
    key: &str,
    change: &mut dyn FnMut(&[u8]) -> Result<Vec<u8>>,
  ) -> Result<Option<Vec<u8>>> {
    let mut conn = self.lock()?;
    // Immediate: takes the write lock up front so other connections to the
    // same file cannot interleave between the read and the write.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: Option<Vec<u8>> = tx
      .query_row(
        "SELECT value FROM kv_entries WHERE namespace = ? AND key = ?",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()?;
    let Some(current) = current else {
      return Ok(None);
    };

    let value = change(&current)?;
    tx.execute(
      "UPDATE kv_entries SET value = ?, updated_at = datetime('now')
       WHERE namespace = ? AND key = ?",
      params![value, namespace, key],
    )?;
    tx.commit()?;

    Ok(Some(value))
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let changed = conn.execute(
      "DELETE FROM kv_entries WHERE namespace = ? AND key = ?",
      params![namespace, key],
    )?;
    Ok(changed > 0)
  }

  fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT key, value FROM kv_entries WHERE namespace = ? ORDER BY key")?;

    let rows = stmt
      .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<std::result::Result<Vec<(String, Vec<u8>)>, _>>()?;

    Ok(rows)
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT DISTINCT namespace FROM kv_entries ORDER BY namespace")?;

    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(names)
  }

  fn drop_namespace(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM kv_entries WHERE namespace = ?",
      params![namespace],
    )?;
    Ok(removed)
  }
}
