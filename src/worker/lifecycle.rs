//! Service worker lifecycle and fetch interception.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::background_sync::{BackgroundSyncQueue, ReplayReport};
use super::cache_storage::CacheStorage;
use super::precache::{ActivateReport, InstallReport, Precache};
use super::request::Request;
use super::router::Router;
use super::strategy::FetchOutcome;
use crate::error::{Result, SyncError};
use crate::notify::{BrowserEvent, EventTarget, SubscriptionId};
use crate::transport::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this version never takes over
  Redundant,
}

/// One version of the worker: routing table, caches and sync queue.
pub struct ServiceWorker {
  router: Router,
  caches: CacheStorage,
  precache: Option<Precache>,
  sync_queue: BackgroundSyncQueue,
  fetcher: Arc<dyn Fetcher>,
  state: WorkerState,
  skip_waiting: bool,
  clients_claimed: bool,
}

impl ServiceWorker {
  pub fn new(
    router: Router,
    caches: CacheStorage,
    precache: Option<Precache>,
    sync_queue: BackgroundSyncQueue,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      router,
      caches,
      precache,
      sync_queue,
      fetcher,
      state: WorkerState::Parsed,
      skip_waiting: false,
      clients_claimed: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Whether this version took over without waiting for old tabs to close.
  pub fn skipped_waiting(&self) -> bool {
    self.skip_waiting
  }

  /// Whether open pages are controlled by this version.
  pub fn controls_clients(&self) -> bool {
    self.clients_claimed
  }

  pub fn caches(&self) -> &CacheStorage {
    &self.caches
  }

  pub fn sync_queue(&self) -> &BackgroundSyncQueue {
    &self.sync_queue
  }

  /// Stage precache assets. The currently active version keeps serving
  /// from its caches while this runs.
  pub async fn install(&mut self) -> Result<InstallReport> {
    self.state = WorkerState::Installing;

    let report = match &self.precache {
      Some(precache) => match precache.install(self.fetcher.as_ref()).await {
        Ok(report) => report,
        Err(e) => {
          warn!(error = %e, "install failed");
          self.state = WorkerState::Redundant;
          return Err(e);
        }
      },
      None => InstallReport::default(),
    };

    self.state = WorkerState::Installed;
    self.skip_waiting = true;
    Ok(report)
  }

  /// Take over: promote precache, purge outdated caches, claim clients.
  pub fn activate(&mut self) -> Result<ActivateReport> {
    if self.state != WorkerState::Installed {
      return Err(SyncError::Config(format!(
        "cannot activate a worker in state {:?}",
        self.state
      )));
    }
    self.state = WorkerState::Activating;

    let report = match &self.precache {
      Some(precache) => precache.activate()?,
      None => ActivateReport::default(),
    };

    self.state = WorkerState::Activated;
    self.clients_claimed = true;
    info!("worker activated and controlling clients");
    Ok(report)
  }

  /// Install then, since waiting is skipped, activate straight away.
  pub async fn start(&mut self) -> Result<(InstallReport, ActivateReport)> {
    let installed = self.install().await?;
    let activated = self.activate()?;
    Ok((installed, activated))
  }

  /// Fetch hook. Pages not yet controlled go straight to the network.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !self.clients_claimed {
      return Ok(FetchOutcome::Network(self.fetcher.fetch(request).await?));
    }

    match self.router.find(request) {
      Some(route) => {
        debug!(route = route.name(), url = %request.url, "routing request");
        route
          .strategy()
          .handle(request, &self.caches, self.fetcher.as_ref())
          .await
      }
      None => Ok(FetchOutcome::Network(self.fetcher.fetch(request).await?)),
    }
  }

  /// Platform sync event. Returns `None` for tags this worker does not own.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<ReplayReport>> {
    if tag != self.sync_queue.name() {
      debug!(tag, "ignoring sync event for unknown tag");
      return Ok(None);
    }
    self.sync_queue.replay(self.fetcher.as_ref()).await.map(Some)
  }

  /// Connectivity came back.
  pub async fn on_online(&self) -> Result<ReplayReport> {
    self.sync_queue.replay(self.fetcher.as_ref()).await
  }

  /// Replay the sync queue in the background whenever `events` reports
  /// connectivity is back. Must be called inside a tokio runtime; replays run
  /// on that runtime.
  pub fn listen(&self, events: &EventTarget) -> Result<SubscriptionId> {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|e| SyncError::Config(format!("no async runtime to replay on: {}", e)))?;
    let queue = self.sync_queue.clone();
    let fetcher = Arc::clone(&self.fetcher);

    Ok(events.add_listener(move |event| {
      if *event != BrowserEvent::Online {
        return;
      }
      let queue = queue.clone();
      let fetcher = Arc::clone(&fetcher);
      runtime.spawn(async move {
        if let Err(e) = queue.replay(fetcher.as_ref()).await {
          warn!(queue = queue.name(), error = %e, "replay after reconnect failed");
        }
      });
    }))
  }
}
