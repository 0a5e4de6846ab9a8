//! Durable cache of read responses.
//!
//! Entries are keyed by request identity (operation document plus normalized
//! variables) and only ever written from a successful network response.

mod key;
mod store;

pub use key::{canonical_json, CacheKey};
pub use store::{CacheEntry, CacheStore};
