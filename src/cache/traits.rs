//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::fetch::{Request, Response};

/// Named collection of generations (the key-value blob store).
///
/// Implementors hand out one `Cache` handle per generation. Handles are
/// cheap; callers open one per lifecycle event and drop it when done.
pub trait CacheStorage: Send + Sync + 'static {
  type Cache: Cache;

  /// Open the generation `name`, creating it if absent.
  fn open(&self, name: &str) -> Result<Self::Cache>;

  /// Whether a generation called `name` exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Names of all existing generations, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and all of its entries. Returns false if it did
  /// not exist.
  fn delete(&self, name: &str) -> Result<bool>;
}

/// A single generation's entries, keyed by request identity.
pub trait Cache: Send + Sync {
  /// Look up the stored response for `request`. Only GET requests match.
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store `response` for `request`, replacing any previous entry.
  /// Non-GET requests are rejected.
  fn put(&self, request: &Request, response: &Response) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, entries: &[(Request, Response)]) -> Result<()>;

  /// Remove the entry for `request`. Returns false if there was none.
  fn delete(&self, request: &Request) -> Result<bool>;

  /// Summaries of every entry, in first-insertion order. Overwriting an
  /// entry keeps its position.
  fn entries(&self) -> Result<Vec<EntryInfo>>;
}

/// A stored response together with when it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Listing row for a cache entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub request: Request,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Result from a fetch, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Cache miss, served from the network
  Network,
  /// Cache hit; a background revalidation was started
  Cache,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => f.pad("network"),
      Self::Cache => f.pad("cache"),
    }
  }
}
