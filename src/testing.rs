//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{Cache, CacheStorage, CachedResponse, EntryInfo, SqliteCache, SqliteStorage};
use crate::fetch::{Fetcher, Request, Response};
use crate::worker::{RevalidationHook, RevalidationOutcome};

pub fn origin() -> Url {
  Url::parse("https://site.test/").unwrap()
}

#[derive(Clone)]
enum Route {
  Respond(Response),
  Fail(String),
  Hang,
}

/// Scripted fetcher keyed by URL path. Unknown paths answer 404.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) {
    self.set(path, Route::Respond(response));
  }

  pub fn fail(&self, path: &str, message: &str) {
    self.set(path, Route::Fail(message.to_string()));
  }

  /// Requests for `path` never resolve.
  pub fn hang(&self, path: &str) {
    self.set(path, Route::Hang);
  }

  pub fn call_count(&self, path: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
  }

  fn set(&self, path: &str, route: Route) {
    self.routes.lock().unwrap().insert(path.to_string(), route);
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let path = request.url.path().to_string();
    self.calls.lock().unwrap().push(path.clone());
    let route = self.routes.lock().unwrap().get(&path).cloned();

    match route {
      Some(Route::Respond(response)) => Ok(response.with_url(request.url.clone())),
      Some(Route::Fail(message)) => Err(eyre!("Failed to fetch {}: {}", request.url, message)),
      Some(Route::Hang) => std::future::pending().await,
      None => Ok(Response::new(404, "not found").with_url(request.url.clone())),
    }
  }
}

/// Revalidation hook that records (path, outcome) pairs.
#[derive(Clone, Default)]
pub struct RecordingHook {
  outcomes: Arc<Mutex<Vec<(String, RevalidationOutcome)>>>,
}

impl RecordingHook {
  pub fn hook(&self) -> RevalidationHook {
    let outcomes = Arc::clone(&self.outcomes);
    Arc::new(move |request: &Request, outcome: &RevalidationOutcome| {
      outcomes
        .lock()
        .unwrap()
        .push((request.url.path().to_string(), outcome.clone()));
    })
  }

  pub fn outcomes(&self) -> Vec<(String, RevalidationOutcome)> {
    self.outcomes.lock().unwrap().clone()
  }
}

/// Storage whose generation deletes and entry writes always fail.
/// Reads and `open` go to an in-memory SQLite store.
pub struct BrokenStorage {
  inner: SqliteStorage,
}

impl BrokenStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
    }
  }
}

impl CacheStorage for BrokenStorage {
  type Cache = BrokenCache;

  fn open(&self, name: &str) -> Result<BrokenCache> {
    Ok(BrokenCache(self.inner.open(name)?))
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.inner.has(name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.inner.keys()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    Err(eyre!("disk I/O error deleting {}", name))
  }
}

pub struct BrokenCache(SqliteCache);

impl Cache for BrokenCache {
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.0.match_request(request)
  }

  fn put(&self, request: &Request, _response: &Response) -> Result<()> {
    Err(eyre!("disk full storing {}", request.url))
  }

  fn put_all(&self, _entries: &[(Request, Response)]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn delete(&self, request: &Request) -> Result<bool> {
    Err(eyre!("disk I/O error deleting {}", request.url))
  }

  fn entries(&self) -> Result<Vec<EntryInfo>> {
    self.0.entries()
  }
}
