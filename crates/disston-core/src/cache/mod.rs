//! In-memory query cache.
//!
//! This module provides the `CacheStore` holding one `CacheEntry` per
//! `QueryKey`. Entries are immutable snapshots; every write replaces the
//! entry and bumps its version, which is how late fetch results are
//! recognized and dropped.
//!
//! Keys used by the club layer:
//! - `["players", ...]`: active list, roster, join requests
//! - `["blogPosts"]`
//! - `["api", ...]`: leagues, standings, matches

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use key::{KeyPart, QueryKey};
pub use store::{CacheEvent, CacheStore, Subscription};
