//! Offline-first data layer.
//!
//! Reads go network-first and fall back to a durable response cache. Writes
//! that cannot reach the server are queued durably and replayed by the
//! background sync controller once connectivity returns. A reactive status
//! store tells the UI whether it is online, how many writes are pending and
//! when the queue last changed.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod queue;
pub mod read;
pub mod status;
pub mod store;
pub mod transport;
pub mod worker;

pub use error::{Result, SyncError, TransportError};
