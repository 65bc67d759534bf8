//! Generation-scoped response cache.
//!
//! This module provides the storage side of the offline cache:
//! - `CacheStorage` manages named generations (open, list, delete)
//! - `Cache` stores responses of one generation keyed by request identity
//! - `SqliteStorage` is the on-disk (or in-memory) implementation

mod storage;
mod traits;

pub use storage::{SqliteCache, SqliteStorage};
pub use traits::{Cache, CacheResult, CacheSource, CacheStorage, CachedResponse, EntryInfo};
