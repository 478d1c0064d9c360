//! Local caching layer for offline-first access to the document store.
//!
//! This module provides a store-agnostic caching mechanism that:
//! - Persists JSON-encoded entries in a string key-value store
//! - Serves entries younger than the TTL without touching the network
//! - Applies mutations optimistically before the remote write
//! - Provides basic offline mode (serve expired cache when network unavailable)
//! - Keeps the cache warm with tracked background refreshes

mod entry;
mod kv;
mod layer;
mod tasks;

pub use entry::{CacheResult, CacheSource, CachedEntry, Clock, ManualClock, SystemClock};
pub use kv::{KeyValueStore, MemoryKv, NoopKv, SqliteKv};
pub use layer::{CacheLayer, DEFAULT_TTL};
pub use tasks::BackgroundTasks;
