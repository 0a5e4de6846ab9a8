//! Ordered request routing.
//!
//! Routes are evaluated in the order they were registered and the first one
//! whose matcher accepts the request handles it.

use std::sync::Arc;

use super::background_sync::BackgroundSyncQueue;
use super::precache::{Precache, PRECACHE_NAME};
use super::request::{Request, RequestMode};
use super::strategy::Strategy;

pub const STATIC_CACHE: &str = "static-resources";
pub const PAGES_CACHE: &str = "pages";
pub const WASM_CACHE: &str = "wasm-module";

/// Predicate deciding whether a route handles a request.
pub type Matcher = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// A named (matcher, strategy) pair.
#[derive(Clone)]
pub struct Route {
  name: String,
  matcher: Matcher,
  strategy: Strategy,
}

impl Route {
  pub fn new<F>(name: impl Into<String>, matcher: F, strategy: Strategy) -> Self
  where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      matcher: Arc::new(matcher),
      strategy,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn strategy(&self) -> &Strategy {
    &self.strategy
  }

  pub fn matches(&self, request: &Request) -> bool {
    (self.matcher)(request)
  }
}

impl std::fmt::Debug for Route {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Route")
      .field("name", &self.name)
      .field("strategy", &self.strategy)
      .finish_non_exhaustive()
  }
}

/// Priority-ordered routing table.
#[derive(Clone, Debug, Default)]
pub struct Router {
  routes: Vec<Route>,
}

impl Router {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a route below every route registered so far.
  pub fn with_route(mut self, route: Route) -> Self {
    self.routes.push(route);
    self
  }

  /// First route that matches, if any.
  pub fn find(&self, request: &Request) -> Option<&Route> {
    self.routes.iter().find(|route| route.matches(request))
  }

  pub fn routes(&self) -> &[Route] {
    &self.routes
  }
}

/// Knobs for [`standard_router`].
#[derive(Debug, Clone)]
pub struct RoutingConfig {
  /// Path prefix of API synchronization writes
  pub sync_path: String,
  /// Path suffix of the WASM module
  pub wasm_suffix: String,
  /// Page shell served to navigations that were never cached
  pub shell_url: Option<String>,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      sync_path: "/api/sync".to_string(),
      wasm_suffix: ".wasm".to_string(),
      shell_url: Some("/".to_string()),
    }
  }
}

/// The application routing table, highest priority first:
///
/// 1. precached manifest assets, cache-first from the precache
/// 2. the WASM module, cache-first in its own cache
/// 3. style/script/image loads, cache-first in `static-resources`
/// 4. navigations, network-first with `pages` fallback
/// 5. `POST` to the sync path, network-only with background sync
pub fn standard_router(
  config: &RoutingConfig,
  precache: Option<&Precache>,
  sync_queue: BackgroundSyncQueue,
) -> Router {
  let mut router = Router::new();

  if let Some(precache) = precache {
    let precache = precache.clone();
    router = router.with_route(Route::new(
      "precache",
      move |req: &Request| req.is_get() && precache.contains(req.url.as_str()),
      Strategy::cache_first(PRECACHE_NAME),
    ));
  }

  let wasm_suffix = config.wasm_suffix.clone();
  let sync_path = config.sync_path.trim_end_matches('/').to_string();

  router
    .with_route(Route::new(
      "wasm",
      move |req: &Request| req.is_get() && req.url.path().ends_with(&wasm_suffix),
      Strategy::cache_first(WASM_CACHE),
    ))
    .with_route(Route::new(
      "static",
      |req: &Request| req.is_get() && req.destination.is_static_asset(),
      Strategy::cache_first(STATIC_CACHE),
    ))
    .with_route(Route::new(
      "navigation",
      |req: &Request| req.mode == RequestMode::Navigate,
      Strategy::NetworkFirst {
        cache_name: PAGES_CACHE.to_string(),
        fallback_url: config.shell_url.clone(),
      },
    ))
    .with_route(Route::new(
      "api-sync",
      move |req: &Request| {
        let path = req.url.path();
        req.method == "POST"
          && (path == sync_path || path.starts_with(&format!("{}/", sync_path)))
      },
      Strategy::NetworkOnly {
        background_sync: Some(sync_queue),
      },
    ))
}
