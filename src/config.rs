use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub precache: PrecacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Origin the app talks to, e.g. "https://app.example.com"
  pub base_url: String,
  #[serde(default = "default_graphql_path")]
  pub graphql_path: String,
  /// Path prefix of synchronization writes that get background sync
  #[serde(default = "default_sync_path")]
  pub sync_path: String,
}

fn default_graphql_path() -> String {
  "/graphql".to_string()
}

fn default_sync_path() -> String {
  "/api/sync".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file; defaults to the platform data directory
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Queued writes older than this are dropped
  #[serde(default = "default_retention_hours")]
  pub retention_hours: u32,
  #[serde(default = "default_wasm_suffix")]
  pub wasm_suffix: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retention_hours: default_retention_hours(),
      wasm_suffix: default_wasm_suffix(),
    }
  }
}

fn default_retention_hours() -> u32 {
  24
}

fn default_wasm_suffix() -> String {
  ".wasm".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecacheConfig {
  /// JSON list of `{url, revision}` entries
  pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Directory for daily log files; stderr only when unset
  pub dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "No configuration file found. Create one at ~/.config/offline-sync/config.yaml".into(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    Self::parse(&contents).map_err(|e| {
      SyncError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| SyncError::Config(e.to_string()))?;
    config.base_url()?;
    Ok(config)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| SyncError::Config(format!("invalid api.base_url {}: {}", self.api.base_url, e)))
  }

  pub fn graphql_url(&self) -> Result<Url> {
    self
      .base_url()?
      .join(&self.api.graphql_path)
      .map_err(|e| SyncError::Config(format!("invalid api.graphql_path: {}", e)))
  }

  /// Queue scope key: the origin writes to the API are queued under.
  pub fn queue_scope(&self) -> Result<String> {
    crate::queue::scope_of(&self.base_url()?)
  }

  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::store::SqliteKv::default_path(),
    }
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::hours(i64::from(self.sync.retention_hours))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks OFFLINE_SYNC_TOKEN; requests go out unauthenticated without it.
  pub fn get_api_token() -> Option<String> {
    std::env::var("OFFLINE_SYNC_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
