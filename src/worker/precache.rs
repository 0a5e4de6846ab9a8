//! Build-time manifest precaching.
//!
//! Install fetches every manifest asset into a staging cache so the live
//! precache keeps serving the running version. Activate promotes the staged
//! assets, drops live entries no longer in the manifest and deletes precaches
//! left behind by older versions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use super::cache_storage::CacheStorage;
use super::request::{Request, Response};
use crate::error::{Result, SyncError, TransportError};
use crate::transport::Fetcher;

/// Live precache name.
pub const PRECACHE_NAME: &str = "precache-v2";
const STAGING_NAME: &str = "precache-v2-temp";
const REVISION_HEADER: &str = "x-precache-revision";
const INSTALL_CONCURRENCY: usize = 4;

/// One asset in the build manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub url: String,
  /// Content revision; absent for URLs that already embed a hash
  #[serde(default)]
  pub revision: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub fetched: Vec<String>,
  pub unchanged: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub promoted: usize,
  pub removed: Vec<String>,
  pub deleted_caches: Vec<String>,
}

/// Manifest resolved against the worker scope.
#[derive(Clone)]
pub struct Precache {
  entries: Vec<(String, String)>,
  urls: HashSet<String>,
  caches: CacheStorage,
}

impl Precache {
  pub fn new(scope: &Url, manifest: &[ManifestEntry], caches: CacheStorage) -> Result<Self> {
    let mut entries = Vec::with_capacity(manifest.len());
    for entry in manifest {
      let url = scope.join(&entry.url).map_err(|e| {
        SyncError::Config(format!("invalid precache url {}: {}", entry.url, e))
      })?;
      entries.push((String::from(url), entry.revision.clone().unwrap_or_default()));
    }
    let urls = entries.iter().map(|(u, _)| u.clone()).collect();

    Ok(Self {
      entries,
      urls,
      caches,
    })
  }

  /// Read a JSON manifest (`[{"url": ..., "revision": ...}]`).
  pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
    })?;
    let manifest = serde_json::from_str(&contents).map_err(|e| {
      SyncError::Config(format!("Failed to parse manifest {}: {}", path.display(), e))
    })?;
    Ok(manifest)
  }

  pub fn contains(&self, url: &str) -> bool {
    self.urls.contains(url)
  }

  pub fn urls(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(u, _)| u.as_str())
  }

  /// Stage new or changed assets. Fails if any asset cannot be fetched, in
  /// which case nothing is staged and the active version is untouched.
  pub async fn install(&self, fetcher: &dyn Fetcher) -> Result<InstallReport> {
    use futures::{StreamExt, TryStreamExt};

    let live = self.caches.open(PRECACHE_NAME);
    let staging = self.caches.open(STAGING_NAME);
    let mut report = InstallReport::default();

    let mut pending = Vec::new();
    for (url, revision) in &self.entries {
      let current = live.get(url)?;
      if current
        .as_ref()
        .is_some_and(|r| r.header(REVISION_HEADER).unwrap_or_default() == revision.as_str())
      {
        report.unchanged.push(url.clone());
      } else {
        pending.push((url, revision));
      }
    }

    let fetched: Vec<(&String, &String, Response)> = futures::stream::iter(pending)
      .map(|(url, revision)| async move {
        let response = fetcher.fetch(&Request::get(url)?).await?;
        if !response.is_success() {
          return Err(SyncError::from(TransportError::Status {
            status: response.status,
            body: format!("precache fetch of {} failed", url),
          }));
        }
        Ok::<_, SyncError>((url, revision, response))
      })
      .buffered(INSTALL_CONCURRENCY)
      .try_collect()
      .await?;

    for (url, revision, response) in fetched {
      staging.put(url, &response.with_header(REVISION_HEADER, revision.clone()))?;
      debug!(%url, %revision, "staged precache asset");
      report.fetched.push(url.clone());
    }

    info!(
      fetched = report.fetched.len(),
      unchanged = report.unchanged.len(),
      "precache installed"
    );
    Ok(report)
  }

  /// Promote staged assets and clean up outdated entries and caches.
  pub fn activate(&self) -> Result<ActivateReport> {
    let live = self.caches.open(PRECACHE_NAME);
    let staging = self.caches.open(STAGING_NAME);
    let mut report = ActivateReport::default();

    for url in staging.urls()? {
      if let Some(response) = staging.get(&url)? {
        live.put(&url, &response)?;
        report.promoted += 1;
      }
    }
    self.caches.delete(STAGING_NAME)?;

    for url in live.urls()? {
      if !self.contains(&url) {
        live.delete(&url)?;
        report.removed.push(url);
      }
    }

    report.deleted_caches = self.cleanup_outdated_caches()?;

    info!(
      promoted = report.promoted,
      removed = report.removed.len(),
      deleted_caches = report.deleted_caches.len(),
      "precache activated"
    );
    Ok(report)
  }

  /// Delete precaches from previous versions.
  fn cleanup_outdated_caches(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.caches.keys()? {
      if name.contains("precache") && name != PRECACHE_NAME && name != STAGING_NAME {
        self.caches.delete(&name)?;
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryKv;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[derive(Default)]
  struct Counting {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Fetcher for Counting {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if request.url.path().ends_with("missing.js") {
        Ok(Response::new(404, ""))
      } else {
        Ok(Response::ok(request.url.path().to_string()))
      }
    }
  }

  fn entry(url: &str, revision: Option<&str>) -> ManifestEntry {
    ManifestEntry {
      url: url.into(),
      revision: revision.map(String::from),
    }
  }

  fn scope() -> Url {
    Url::parse("https://app.example.com/").unwrap()
  }

  #[tokio::test]
  async fn test_install_stages_without_touching_live() {
    let caches = CacheStorage::new(Arc::new(MemoryKv::new()));
    let precache = Precache::new(
      &scope(),
      &[entry("/index.html", Some("1")), entry("/app.abc123.js", None)],
      caches.clone(),
    )
    .unwrap();

    let report = precache.install(&Counting::default()).await.unwrap();
    assert_eq!(report.fetched.len(), 2);
    assert!(caches.open(PRECACHE_NAME).urls().unwrap().is_empty());

    let activated = precache.activate().unwrap();
    assert_eq!(activated.promoted, 2);
    assert_eq!(
      caches.open(PRECACHE_NAME).urls().unwrap(),
      vec![
        "https://app.example.com/app.abc123.js",
        "https://app.example.com/index.html"
      ]
    );
    assert_eq!(caches.keys().unwrap(), vec![PRECACHE_NAME]);
  }

  #[tokio::test]
  async fn test_new_version_refetches_changed_and_purges_stale() {
    let caches = CacheStorage::new(Arc::new(MemoryKv::new()));
    let v1 = Precache::new(
      &scope(),
      &[entry("/index.html", Some("1")), entry("/gone.js", Some("1"))],
      caches.clone(),
    )
    .unwrap();
    v1.install(&Counting::default()).await.unwrap();
    v1.activate().unwrap();

    // Left behind by an older build
    caches
      .open("precache-v1")
      .put("https://app.example.com/old.js", &Response::ok("old"))
      .unwrap();

    let v2 = Precache::new(
      &scope(),
      &[entry("/index.html", Some("1")), entry("/new.js", Some("7"))],
      caches.clone(),
    )
    .unwrap();
    let fetcher = Counting::default();
    let report = v2.install(&fetcher).await.unwrap();
    assert_eq!(report.unchanged, vec!["https://app.example.com/index.html"]);
    assert_eq!(report.fetched, vec!["https://app.example.com/new.js"]);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let activated = v2.activate().unwrap();
    assert_eq!(activated.removed, vec!["https://app.example.com/gone.js"]);
    assert_eq!(activated.deleted_caches, vec!["precache-v1"]);
    assert_eq!(
      caches.open(PRECACHE_NAME).urls().unwrap(),
      vec![
        "https://app.example.com/index.html",
        "https://app.example.com/new.js"
      ]
    );
  }

  #[tokio::test]
  async fn test_install_fails_on_bad_asset() {
    let caches = CacheStorage::new(Arc::new(MemoryKv::new()));
    let precache = Precache::new(&scope(), &[entry("/missing.js", Some("1"))], caches).unwrap();

    let err = precache.install(&Counting::default()).await.unwrap_err();
    assert!(err.is_network());
  }

  #[test]
  fn test_load_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(
      &path,
      r#"[{"url": "/index.html", "revision": "abc"}, {"url": "/a.1.js"}]"#,
    )
    .unwrap();

    let manifest = Precache::load_manifest(&path).unwrap();
    assert_eq!(
      manifest,
      vec![entry("/index.html", Some("abc")), entry("/a.1.js", None)]
    );
  }
}
