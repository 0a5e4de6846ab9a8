//! Caching strategies for intercepted requests.

use tracing::{debug, warn};

use super::background_sync::BackgroundSyncQueue;
use super::cache_storage::CacheStorage;
use super::request::{Request, Response};
use crate::error::Result;
use crate::queue::QueuedRequest;
use crate::transport::Fetcher;

/// What the fetch hook hands back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Live response
  Network(Response),
  /// Served from a named cache
  Cache(Response),
  /// The write did not go through and was queued for background sync.
  /// Accepted, not confirmed.
  Queued(QueuedRequest),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      FetchOutcome::Network(r) | FetchOutcome::Cache(r) => Some(r),
      FetchOutcome::Queued(_) => None,
    }
  }

  pub fn is_queued(&self) -> bool {
    matches!(self, FetchOutcome::Queued(_))
  }
}

/// How a class of requests is served.
#[derive(Clone)]
pub enum Strategy {
  /// Serve from cache; on a miss fetch and populate.
  CacheFirst { cache_name: String },
  /// Fetch and populate; on failure serve the cached copy, or the
  /// `fallback_url` shell when the URL itself was never cached.
  NetworkFirst {
    cache_name: String,
    fallback_url: Option<String>,
  },
  /// Always fetch. With a background-sync queue attached, failed requests
  /// are persisted for replay instead of failing.
  NetworkOnly {
    background_sync: Option<BackgroundSyncQueue>,
  },
}

impl std::fmt::Debug for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Strategy::CacheFirst { cache_name } => f
        .debug_struct("CacheFirst")
        .field("cache_name", cache_name)
        .finish(),
      Strategy::NetworkFirst {
        cache_name,
        fallback_url,
      } => f
        .debug_struct("NetworkFirst")
        .field("cache_name", cache_name)
        .field("fallback_url", fallback_url)
        .finish(),
      Strategy::NetworkOnly { background_sync } => f
        .debug_struct("NetworkOnly")
        .field("background_sync", &background_sync.as_ref().map(|q| q.name()))
        .finish(),
    }
  }
}

impl Strategy {
  pub fn cache_first(cache_name: impl Into<String>) -> Self {
    Strategy::CacheFirst {
      cache_name: cache_name.into(),
    }
  }

  pub fn network_first(cache_name: impl Into<String>) -> Self {
    Strategy::NetworkFirst {
      cache_name: cache_name.into(),
      fallback_url: None,
    }
  }

  pub async fn handle(
    &self,
    request: &Request,
    caches: &CacheStorage,
    fetcher: &dyn Fetcher,
  ) -> Result<FetchOutcome> {
    let url = request.url.as_str();

    match self {
      Strategy::CacheFirst { cache_name } => {
        let cache = caches.open(cache_name);
        if let Some(cached) = cache.get(url)? {
          debug!(cache = %cache_name, url, "cache hit");
          return Ok(FetchOutcome::Cache(cached));
        }

        let response = fetcher.fetch(request).await?;
        if request.is_get() && response.is_success() {
          cache.put(url, &response)?;
        }
        Ok(FetchOutcome::Network(response))
      }

      Strategy::NetworkFirst {
        cache_name,
        fallback_url,
      } => {
        let cache = caches.open(cache_name);
        match fetcher.fetch(request).await {
          Ok(response) => {
            if request.is_get() && response.is_success() {
              cache.put(url, &response)?;
            }
            Ok(FetchOutcome::Network(response))
          }
          Err(error) => {
            if let Some(cached) = cache.get(url)? {
              warn!(url, %error, "network failed, serving cached page");
              return Ok(FetchOutcome::Cache(cached));
            }

            if let Some(fallback) = fallback_url {
              let shell_url = request.url.join(fallback).map(String::from).ok();
              if let Some(shell) = shell_url.map(|u| cache.get(&u)).transpose()?.flatten() {
                warn!(url, %error, fallback = %fallback, "network failed, serving page shell");
                return Ok(FetchOutcome::Cache(shell));
              }
            }

            Err(error.into())
          }
        }
      }

      Strategy::NetworkOnly { background_sync } => match fetcher.fetch(request).await {
        Ok(response) => Ok(FetchOutcome::Network(response)),
        Err(error) => match background_sync {
          Some(queue) => {
            debug!(url, %error, "network write failed, queueing");
            Ok(FetchOutcome::Queued(queue.push(request)?))
          }
          None => Err(error.into()),
        },
      },
    }
  }
}
