//! Logging configuration using tracing
//!
//! Structured logging to stderr and, when a directory is configured, to a
//! daily-rolling file. Filtering follows `RUST_LOG`.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SyncError};

const LOG_FILE_PREFIX: &str = "offline-sync.log";

/// Initialize the tracing subscriber.
///
/// Defaults to "warn" when `RUST_LOG` is unset. The returned guard flushes the
/// file writer on drop and must be held for the life of the process.
///
/// # Errors
/// Returns an error if the log directory cannot be created or a subscriber
/// is already installed.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir).map_err(|e| {
        SyncError::Config(format!("Failed to create log dir {}: {}", dir.display(), e))
      })?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
    .with(file_layer)
    .try_init()
    .map_err(|e| SyncError::Config(format!("Failed to initialize tracing: {}", e)))?;

  Ok(guard)
}
