//! In-memory store, used when persistence is disabled and in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::KvStore;
use crate::error::{Result, SyncError};

/// Volatile [`KvStore`]. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
  entries: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>>> {
    self
      .entries
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl KvStore for MemoryKv {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let entries = self.lock()?;
    Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
  }

  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
    let mut entries = self.lock()?;
    entries.insert((namespace.to_string(), key.to_string()), value.to_vec());
    Ok(())
  }

  fn replace(&self, namespace: &str, key: &str, value: &[u8]) -> Result<bool> {
    let mut entries = self.lock()?;
    match entries.get_mut(&(namespace.to_string(), key.to_string())) {
      Some(existing) => {
        *existing = value.to_vec();
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn update(
    &self,
    namespace: &str,
    key: &str,
    change: &mut dyn FnMut(&[u8]) -> Result<Vec<u8>>,
  ) -> Result<Option<Vec<u8>>> {
    let mut entries = self.lock()?;
    match entries.get_mut(&(namespace.to_string(), key.to_string())) {
      Some(existing) => {
        *existing = change(existing)?;
        Ok(Some(existing.clone()))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    let mut entries = self.lock()?;
    Ok(
      entries
        .remove(&(namespace.to_string(), key.to_string()))
        .is_some(),
    )
  }

  fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let entries = self.lock()?;
    Ok(
      entries
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|((_, key), value)| (key.clone(), value.clone()))
        .collect(),
    )
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let entries = self.lock()?;
    let mut names: Vec<String> = entries.keys().map(|(ns, _)| ns.clone()).collect();
    names.dedup();
    Ok(names)
  }

  fn drop_namespace(&self, namespace: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|(ns, _), _| ns != namespace);
    Ok(before - entries.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_namespaces_are_isolated() {
    let kv = MemoryKv::new();
    kv.put("a", "k", b"1").unwrap();
    kv.put("b", "k", b"2").unwrap();

    assert_eq!(kv.get("a", "k").unwrap(), Some(b"1".to_vec()));
    assert_eq!(kv.list_all("b").unwrap(), vec![("k".to_string(), b"2".to_vec())]);
    assert_eq!(kv.namespaces().unwrap(), vec!["a".to_string(), "b".to_string()]);

    assert_eq!(kv.drop_namespace("a").unwrap(), 1);
    assert_eq!(kv.get("a", "k").unwrap(), None);
  }

  #[test]
  fn test_replace_does_not_resurrect() {
    let kv = MemoryKv::new();
    assert!(!kv.replace("ns", "gone", b"x").unwrap());
    assert_eq!(kv.get("ns", "gone").unwrap(), None);

    kv.put("ns", "here", b"x").unwrap();
    assert!(kv.replace("ns", "here", b"y").unwrap());
    assert_eq!(kv.get("ns", "here").unwrap(), Some(b"y".to_vec()));
  }

  #[test]
  fn test_update_in_place() {
    let kv = MemoryKv::new();
    let mut append = |old: &[u8]| -> Result<Vec<u8>> { Ok([old, &b"!"[..]].concat()) };

    assert_eq!(kv.update("ns", "gone", &mut append).unwrap(), None);
    assert_eq!(kv.get("ns", "gone").unwrap(), None);

    kv.put("ns", "here", b"x").unwrap();
    assert_eq!(kv.update("ns", "here", &mut append).unwrap(), Some(b"x!".to_vec()));

    let mut fail = |_: &[u8]| -> Result<Vec<u8>> { Err(SyncError::Storage("corrupt".into())) };
    assert!(kv.update("ns", "here", &mut fail).is_err());
    assert_eq!(kv.get("ns", "here").unwrap(), Some(b"x!".to_vec()));
  }
}
