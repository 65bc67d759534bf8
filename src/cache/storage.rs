//! SQLite implementation of the cache storage.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use super::traits::{Cache, CacheStorage, CachedResponse, EntryInfo};
use crate::fetch::{Method, Request, Response, ResponseType};

/// SQLite-based cache storage implementation.
///
/// Generation handles share the storage's connection, so writes through any
/// handle are immediately visible to every other handle.
#[derive(Clone)]
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sitecache").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    lock(&self.conn)
  }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per generation
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by sha256(method + url)
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    response_url TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES cache_generations(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

impl CacheStorage for SqliteStorage {
  type Cache = SqliteCache;

  fn open(&self, name: &str) -> Result<SqliteCache> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", name, e))?;

    Ok(SqliteCache {
      conn: Arc::clone(&self.conn),
      name: name.to_string(),
    })
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Handle to one generation inside a `SqliteStorage`.
pub struct SqliteCache {
  conn: Arc<Mutex<Connection>>,
  name: String,
}

impl SqliteCache {
  fn insert(conn: &Connection, generation: &str, request: &Request, response: &Response) -> Result<()> {
    if !request.method.is_get() {
      return Err(eyre!(
        "Cannot cache {} request for {}: only GET is supported",
        request.method,
        request.url
      ));
    }

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO cache_entries
           (generation, request_key, method, url, status, response_type, headers, response_url, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
         ON CONFLICT(generation, request_key) DO UPDATE SET
           method = excluded.method,
           url = excluded.url,
           status = excluded.status,
           response_type = excluded.response_type,
           headers = excluded.headers,
           response_url = excluded.response_url,
           body = excluded.body,
           cached_at = excluded.cached_at",
        params![
          generation,
          request.cache_key(),
          request.method.as_str(),
          request.url.as_str(),
          response.status,
          response.response_type.as_str(),
          headers,
          response.url.as_ref().map(Url::as_str),
          response.body.as_ref(),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", request.url, e))?;

    Ok(())
  }
}

impl Cache for SqliteCache {
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    if !request.method.is_get() {
      return Ok(None);
    }

    let conn = lock(&self.conn)?;
    let row: Option<(i64, String, String, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, response_type, headers, response_url, body, cached_at
         FROM cache_entries WHERE generation = ? AND request_key = ?",
        params![self.name, request.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    let Some((status, response_type, headers, response_url, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to parse stored headers for {}: {}", request.url, e))?;
    let url = response_url
      .map(|u| Url::parse(&u))
      .transpose()
      .map_err(|e| eyre!("Failed to parse stored URL for {}: {}", request.url, e))?;
    let status = u16::try_from(status).map_err(|_| eyre!("Invalid stored status {}", status))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        response_type: ResponseType::parse(&response_type)?,
        headers,
        url,
        body: Bytes::from(body),
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let conn = lock(&self.conn)?;
    Self::insert(&conn, &self.name, request, response)
  }

  fn put_all(&self, entries: &[(Request, Response)]) -> Result<()> {
    let conn = lock(&self.conn)?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Dropping `tx` on error rolls everything back
    for (request, response) in entries {
      Self::insert(&tx, &self.name, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, request: &Request) -> Result<bool> {
    let conn = lock(&self.conn)?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ? AND request_key = ?",
        params![self.name, request.cache_key()],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", request.url, e))?;
    Ok(removed > 0)
  }

  fn entries(&self) -> Result<Vec<EntryInfo>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, length(body), cached_at
         FROM cache_entries WHERE generation = ?
         ORDER BY rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![self.name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        let url = Url::parse(&url).map_err(|e| eyre!("Invalid stored URL '{}': {}", url, e))?;
        Ok(EntryInfo {
          request: Request::new(Method::new(&method), url),
          status: u16::try_from(status).map_err(|_| eyre!("Invalid stored status {}", status))?,
          size: usize::try_from(size).unwrap_or_default(),
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://site.test/").unwrap()
  }

  fn req(path: &str) -> Request {
    Request::for_path(&origin(), path).unwrap()
  }

  #[test]
  fn test_open_creates_generation_once() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(!storage.has("v1").unwrap());

    storage.open("v1").unwrap();
    storage.open("v1").unwrap();
    storage.open("v2").unwrap();

    assert!(storage.has("v1").unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["v1", "v2"]);
  }

  #[test]
  fn test_put_and_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    let response = Response::new(200, "<h1>home</h1>")
      .with_header("Content-Type", "text/html")
      .with_url(origin());

    cache.put(&req("/"), &response).unwrap();

    let hit = cache.match_request(&req("/")).unwrap().unwrap();
    assert_eq!(hit.response, response);
    assert!(cache.match_request(&req("/missing.html")).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_in_place() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();

    cache.put(&req("/a.html"), &Response::new(200, "old")).unwrap();
    cache.put(&req("/a.html"), &Response::new(200, "new")).unwrap();

    let hit = cache.match_request(&req("/a.html")).unwrap().unwrap();
    assert_eq!(hit.response.body, Bytes::from("new"));
    assert_eq!(cache.entries().unwrap().len(), 1);
  }

  #[test]
  fn test_overwrite_keeps_listing_position() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();

    cache.put(&req("/"), &Response::new(200, "home")).unwrap();
    cache.put(&req("/a.html"), &Response::new(200, "page a")).unwrap();
    cache.put(&req("/"), &Response::new(200, "home v2")).unwrap();

    let entries = cache.entries().unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.request.url.path()).collect();
    assert_eq!(paths, vec!["/", "/a.html"]);
    assert_eq!(entries[0].size, 7);
  }

  #[test]
  fn test_match_ignores_fragment() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    cache.put(&req("/a.html"), &Response::new(200, "page a")).unwrap();

    let hit = cache.match_request(&req("/a.html#top")).unwrap();
    assert_eq!(hit.map(|h| h.response.body), Some(Bytes::from("page a")));
  }

  #[test]
  fn test_generations_are_isolated() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let v1 = storage.open("v1").unwrap();
    let v2 = storage.open("v2").unwrap();

    v1.put(&req("/"), &Response::new(200, "one")).unwrap();

    assert!(v2.match_request(&req("/")).unwrap().is_none());
    assert!(v1.match_request(&req("/")).unwrap().is_some());
  }

  #[test]
  fn test_non_get_is_rejected_and_never_matches() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    let post = Request::new(Method::new("POST"), origin());

    assert!(cache.put(&post, &Response::new(200, "x")).is_err());
    assert!(cache.match_request(&post).unwrap().is_none());
  }

  #[test]
  fn test_put_all_is_all_or_nothing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    let entries = vec![
      (req("/"), Response::new(200, "home")),
      (Request::new(Method::new("PUT"), origin()), Response::new(200, "bad")),
    ];

    assert!(cache.put_all(&entries).is_err());
    assert!(cache.entries().unwrap().is_empty());
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = storage.open("old").unwrap();
    old.put(&req("/"), &Response::new(200, "stale")).unwrap();

    assert!(storage.delete("old").unwrap());
    assert!(!storage.delete("old").unwrap());
    assert!(storage.keys().unwrap().is_empty());

    // Reopening yields an empty generation
    let reopened = storage.open("old").unwrap();
    assert!(reopened.match_request(&req("/")).unwrap().is_none());
  }

  #[test]
  fn test_delete_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    cache.put(&req("/"), &Response::new(200, "home")).unwrap();

    assert!(cache.delete(&req("/")).unwrap());
    assert!(!cache.delete(&req("/")).unwrap());
  }

  #[test]
  fn test_entries_listing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = storage.open("v1").unwrap();
    cache.put(&req("/"), &Response::new(200, "home")).unwrap();
    cache.put(&req("/a.html"), &Response::new(200, "page a")).unwrap();

    let entries = cache.entries().unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.request.url.path()).collect();
    assert_eq!(paths, vec!["/", "/a.html"]);
    assert_eq!(entries[1].size, 6);
    assert_eq!(entries[1].status, 200);
  }

  #[test]
  fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    {
      let storage = SqliteStorage::open(&path).unwrap();
      let cache = storage.open("v1").unwrap();
      cache.put(&req("/"), &Response::new(200, "home")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let cache = storage.open("v1").unwrap();
    assert!(cache.match_request(&req("/")).unwrap().is_some());
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
