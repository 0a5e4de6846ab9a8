use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offline_sync::clock::{Clock, SystemClock};
use offline_sync::config::Config;
use offline_sync::notify::EventTarget;
use offline_sync::queue::{QueueStore, QueuedRequest};
use offline_sync::read::{OfflineReader, ReadOptions};
use offline_sync::status::OfflineStatusCoordinator;
use offline_sync::store::{KvStore, SqliteKv};
use offline_sync::transport::{Fetcher, GraphqlTransport, HttpFetcher, Operation};
use offline_sync::worker::{
  standard_router, BackgroundSyncQueue, CacheStorage, FetchOutcome, Precache, Request,
  RoutingConfig, ServiceWorker,
};
use offline_sync::{cache::CacheStore, logging};
use std::path::PathBuf;
use std::sync::Arc;

/// Background sync tag owned by the write queue.
const SYNC_TAG: &str = "api-sync";

#[derive(Parser, Debug)]
#[command(name = "offline-sync")]
#[command(about = "Offline-first response cache, write queue and background sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a GraphQL query, serving the last cached result when offline
  Read {
    /// GraphQL document
    document: String,
    /// Variables as a JSON object
    #[arg(long)]
    vars: Option<String>,
    /// Operation name
    #[arg(long)]
    name: Option<String>,
    /// Fail instead of falling back to the cache
    #[arg(long)]
    no_fallback: bool,
  },
  /// Send a sync write; it is queued if the server cannot be reached
  Write {
    /// Path under the sync endpoint, e.g. /api/sync
    path: String,
    /// Request body
    #[arg(long, default_value = "{}")]
    body: String,
  },
  /// Inspect or replay queued writes
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Show connectivity and pending writes
  Status {
    /// Check that the API answers before reporting
    #[arg(long)]
    probe: bool,
  },
  /// Install and activate the precache manifest
  Precache,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List queued writes, oldest first
  List {
    /// Include writes for every destination, not just the configured API
    #[arg(long)]
    all: bool,
  },
  /// Replay queued writes now
  Replay,
}

/// Everything a command needs, opened once.
struct Context {
  config: Config,
  kv: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  events: Arc<EventTarget>,
  queue: QueueStore,
  token: Option<String>,
}

impl Context {
  fn open(config: Config) -> Result<Self> {
    let path = config.storage_path()?;
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKv::open(&path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = Arc::new(EventTarget::default());
    let queue =
      QueueStore::open(Arc::clone(&kv), Arc::clone(&clock))?.with_events(Arc::clone(&events));

    Ok(Self {
      config,
      kv,
      clock,
      events,
      queue,
      token: Config::get_api_token(),
    })
  }

  fn fetcher(&self) -> Result<Arc<HttpFetcher>> {
    Ok(Arc::new(HttpFetcher::new(self.token.as_deref())?))
  }

  fn coordinator(&self) -> Result<Arc<OfflineStatusCoordinator>> {
    let coordinator = Arc::new(OfflineStatusCoordinator::new(
      self.queue.clone(),
      Arc::clone(&self.events),
    ));
    coordinator.initialize_offline_status_listeners(&self.config.queue_scope()?)?;
    Ok(coordinator)
  }

  fn sync_queue(&self) -> BackgroundSyncQueue {
    BackgroundSyncQueue::new(SYNC_TAG, self.queue.clone()).with_retention(self.config.retention())
  }

  fn routing(&self) -> RoutingConfig {
    RoutingConfig {
      sync_path: self.config.api.sync_path.clone(),
      wasm_suffix: self.config.sync.wasm_suffix.clone(),
      ..RoutingConfig::default()
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.logging.dir.as_deref())?;

  let ctx = Context::open(config)?;

  match args.command {
    Command::Read {
      document,
      vars,
      name,
      no_fallback,
    } => read(&ctx, document, vars, name, no_fallback).await,
    Command::Write { path, body } => write(&ctx, &path, body).await,
    Command::Queue(QueueCommand::List { all }) => list_queue(&ctx, all),
    Command::Queue(QueueCommand::Replay) => replay(&ctx).await,
    Command::Status { probe } => status(&ctx, probe).await,
    Command::Precache => precache(&ctx).await,
  }
}

async fn read(
  ctx: &Context,
  document: String,
  vars: Option<String>,
  name: Option<String>,
  no_fallback: bool,
) -> Result<()> {
  let variables = match vars {
    Some(v) => serde_json::from_str(&v).map_err(|e| eyre!("Invalid --vars JSON: {}", e))?,
    None => serde_json::Value::Null,
  };
  let operation = match name {
    Some(name) => Operation::named(name, document),
    None => Operation::new(document),
  };

  let coordinator = ctx.coordinator()?;
  let probe = Arc::clone(&coordinator);
  let transport = GraphqlTransport::new(ctx.config.graphql_url()?, ctx.token.as_deref())?;
  let reader = OfflineReader::new(
    Arc::new(transport),
    CacheStore::new(Arc::clone(&ctx.kv)),
    Arc::clone(&ctx.clock),
  )
  .with_probe(move |reachable| probe.record_probe(reachable));

  let result = reader
    .perform_read_with(
      &operation,
      &variables,
      ReadOptions {
        cache_fallback: !no_fallback,
      },
    )
    .await?;

  println!("{}", serde_json::to_string_pretty(&result.data)?);
  if result.is_stale() {
    let error = result.error.map(|e| e.to_string()).unwrap_or_default();
    eprintln!(
      "offline: showing data cached at {} ({})",
      format_ms(result.timestamp),
      error
    );
  }
  Ok(())
}

async fn write(ctx: &Context, path: &str, body: String) -> Result<()> {
  let url = ctx.config.base_url()?.join(path)?;
  let request = Request::post(url.as_str(), body)?.with_header("content-type", "application/json");

  let router = standard_router(&ctx.routing(), None, ctx.sync_queue());
  let route = router
    .find(&request)
    .ok_or_else(|| {
      eyre!(
        "{} is not a sync endpoint (expected {})",
        path,
        ctx.config.api.sync_path
      )
    })?;

  let caches = CacheStorage::new(Arc::clone(&ctx.kv));
  let fetcher = ctx.fetcher()?;
  match route.strategy().handle(&request, &caches, fetcher.as_ref()).await? {
    FetchOutcome::Queued(queued) => {
      println!("queued {} (will sync when the server is reachable)", queued.id)
    }
    outcome => {
      let status = outcome.response().map(|r| r.status).unwrap_or_default();
      println!("sent: {}", status);
    }
  }
  Ok(())
}

fn list_queue(ctx: &Context, all: bool) -> Result<()> {
  let scope = ctx.config.queue_scope()?;
  let requests = ctx
    .queue
    .read_queued_requests(if all { None } else { Some(scope.as_str()) })?;

  if requests.is_empty() {
    println!("queue is empty");
    return Ok(());
  }

  for request in &requests {
    print_queued(request);
  }
  println!("{} queued", requests.len());
  Ok(())
}

async fn replay(ctx: &Context) -> Result<()> {
  let coordinator = ctx.coordinator()?;
  let fetcher: Arc<dyn Fetcher> = ctx.fetcher()?;
  let sync = ctx.sync_queue();
  let worker = ServiceWorker::new(
    standard_router(&ctx.routing(), None, sync.clone()),
    CacheStorage::new(Arc::clone(&ctx.kv)),
    None,
    sync,
    fetcher,
  );

  let report = worker
    .on_sync(SYNC_TAG)
    .await?
    .ok_or_else(|| eyre!("no sync queue registered for {}", SYNC_TAG))?;

  for request in &report.expired {
    eprintln!("lost (past retention window):");
    print_queued(request);
  }
  for request in &report.rejected {
    eprintln!("lost (not replayable):");
    print_queued(request);
  }
  println!(
    "replayed {}, failed {}, expired {}, rejected {}",
    report.replayed.len(),
    report.failed.len(),
    report.expired.len(),
    report.rejected.len()
  );

  let status = coordinator.status().get();
  println!("{} still queued", status.queued_count);
  Ok(())
}

async fn status(ctx: &Context, probe: bool) -> Result<()> {
  let coordinator = ctx.coordinator()?;

  if probe {
    let fetcher = ctx.fetcher()?;
    let request = Request::get(ctx.config.base_url()?.as_str())?;
    let reachable = fetcher.fetch(&request).await.is_ok();
    coordinator.record_probe(reachable);
  }

  let status = coordinator.status().get();
  println!("online:      {}", status.is_online);
  println!("queued:      {}", status.queued_count);
  println!("last synced: {}", format_ms(status.last_synced_at));
  Ok(())
}

async fn precache(ctx: &Context) -> Result<()> {
  let manifest_path = ctx
    .config
    .precache
    .manifest
    .as_deref()
    .ok_or_else(|| eyre!("precache.manifest is not configured"))?;
  let manifest = Precache::load_manifest(manifest_path)?;

  let caches = CacheStorage::new(Arc::clone(&ctx.kv));
  let precache = Precache::new(&ctx.config.base_url()?, &manifest, caches.clone())?;
  let sync = ctx.sync_queue();
  let router = standard_router(&ctx.routing(), Some(&precache), sync.clone());
  let fetcher: Arc<dyn Fetcher> = ctx.fetcher()?;

  let mut worker = ServiceWorker::new(router, caches, Some(precache), sync, fetcher);
  let (installed, activated) = worker.start().await?;

  println!(
    "fetched {}, unchanged {}, promoted {}",
    installed.fetched.len(),
    installed.unchanged.len(),
    activated.promoted
  );
  for url in &activated.removed {
    println!("removed {}", url);
  }
  for name in &activated.deleted_caches {
    println!("deleted cache {}", name);
  }
  Ok(())
}

fn print_queued(request: &QueuedRequest) {
  println!(
    "{}  {}  {} {}  attempts={}",
    request.id,
    format_ms(Some(request.queued_at)),
    request.method,
    request.url(),
    request.attempts
  );
}

fn format_ms(ms: Option<i64>) -> String {
  ms.and_then(DateTime::<Utc>::from_timestamp_millis)
    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| "never".to_string())
}
