//! Offline status coordination.
//!
//! [`StatusStore`] holds the process-wide [`OfflineStatus`] the UI renders
//! from. Only [`OfflineStatusCoordinator`] mutates it, in response to
//! connectivity events, queue-change notifications and read-path probes.

mod coordinator;
mod store;

pub use coordinator::OfflineStatusCoordinator;
pub use store::{OfflineStatus, StatusStore};
