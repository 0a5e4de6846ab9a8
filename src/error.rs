//! Error types for the offline data layer.

use thiserror::Error;

/// Result type alias used across the library.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure talking to the network.
///
/// The read path recovers from these when a cache entry exists; the write
/// path recovers by queueing.
#[derive(Error, Debug)]
pub enum TransportError {
  #[error("network unreachable: {0}")]
  Unreachable(String),

  #[error("server responded with status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("graphql errors: {}", .0.join("; "))]
  GraphQl(Vec<String>),
}

impl TransportError {
  /// Whether the server could not be reached at all, as opposed to
  /// answering with an error.
  pub fn is_unreachable(&self) -> bool {
    matches!(self, TransportError::Unreachable(_))
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      TransportError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
      TransportError::Status {
        status: status.as_u16(),
        body: e.to_string(),
      }
    } else {
      TransportError::Unreachable(e.to_string())
    }
  }
}

/// All errors surfaced by the library.
#[derive(Error, Debug)]
pub enum SyncError {
  /// Network failure with nothing local to fall back on.
  #[error(transparent)]
  Network(#[from] TransportError),

  /// The cache or queue store is unavailable. Always fatal for the operation.
  #[error("storage error: {0}")]
  Storage(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    SyncError::Storage(e.to_string())
  }
}

impl SyncError {
  /// Whether this error came from the network rather than local state.
  pub fn is_network(&self) -> bool {
    matches!(self, SyncError::Network(_))
  }
}
