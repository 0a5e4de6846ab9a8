//! Background sync controller (service-worker layer).
//!
//! Intercepts requests, serves them through per-class caching strategies
//! chosen by an ordered routing table, and durably retries API
//! synchronization writes independent of page lifetime.

mod background_sync;
mod cache_storage;
mod lifecycle;
mod precache;
mod request;
mod router;
mod strategy;

pub use background_sync::{BackgroundSyncQueue, ReplayReport, DEFAULT_RETENTION_MINUTES};
pub use cache_storage::{CacheStorage, NamedCache};
pub use lifecycle::{ServiceWorker, WorkerState};
pub use precache::{ActivateReport, InstallReport, ManifestEntry, Precache, PRECACHE_NAME};
pub use request::{Destination, Request, RequestMode, Response};
pub use router::{
  standard_router, Matcher, Route, Router, RoutingConfig, PAGES_CACHE, STATIC_CACHE, WASM_CACHE,
};
pub use strategy::{FetchOutcome, Strategy};
