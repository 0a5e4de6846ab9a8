//! Durable queue of pending mutating requests.
//!
//! A write that cannot reach the server is appended here and replayed later by
//! the background sync queue. Entries survive restarts and leave the queue only
//! through [`QueueStore::remove`] (confirmed replay) or
//! [`QueueStore::purge_expired`] (retention window elapsed).

mod store;

pub use store::{scope_of, NewRequest, QueueStore, QueuedRequest};
