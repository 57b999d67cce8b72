//! SQLite implementation of the blob cache.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{request_key, BlobCache, CachedResponse};
use crate::db;
use crate::net::{Request, Response, ResponseSource};

/// SQLite-based blob cache storage.
pub struct SqliteBlobCache {
  conn: Mutex<Connection>,
}

impl SqliteBlobCache {
  /// Open the cache database at `path`, creating it if needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::with_connection(db::open_file(path)?)
  }

  /// Cache that lives only as long as the process.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(db::open_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = db::lock(&self.conn)?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named generation; rowid preserves creation order
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses keyed by normalized request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

type EntryRow = (u16, String, Vec<u8>, String);

fn decode_entry((status, headers, body, cached_at): EntryRow) -> Result<CachedResponse> {
  let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  let response = Response::new(status, body)
    .with_headers(headers)
    .with_source(ResponseSource::Cache);

  Ok(CachedResponse {
    response,
    cached_at: db::parse_datetime(&cached_at)?,
  })
}

impl BlobCache for SqliteBlobCache {
  fn open(&self, name: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = db::lock(&self.conn)?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = db::lock(&self.conn)?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
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
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn len(&self, name: &str) -> Result<usize> {
    let conn = db::lock(&self.conn)?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", name, e))?;
    Ok(count as usize)
  }

  fn match_in(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = db::lock(&self.conn)?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
        params![name, request_key(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match request in {}: {}", name, e))?;

    row.map(decode_entry).transpose()
  }

  fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = db::lock(&self.conn)?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.status, e.headers, e.body, e.cached_at FROM cache_entries e
         INNER JOIN cache_generations g ON g.name = e.generation
         WHERE e.request_key = ?
         ORDER BY g.rowid
         LIMIT 1",
        params![request_key(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match request: {}", e))?;

    row.map(decode_entry).transpose()
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
      return Err(eyre!(
        "Refusing to cache {} {}: only GET requests are cacheable",
        request.method,
        request.url
      ));
    }

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
       (generation, request_key, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        request_key(request),
        request.method.as_str(),
        request.url.as_str(),
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn page(body: &str) -> Response {
    Response::new(200, body.as_bytes().to_vec()).with_header("content-type", "text/html")
  }

  #[test]
  fn test_put_then_match_in() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    let request = get("http://localhost/index.html");
    cache.put("static-v2", &request, &page("<h1>hi</h1>")).unwrap();

    let hit = cache.match_in("static-v2", &request).unwrap().unwrap();
    assert_eq!(hit.response.status, 200);
    assert_eq!(hit.response.body, b"<h1>hi</h1>");
    assert_eq!(hit.response.header("content-type"), Some("text/html"));
    assert_eq!(hit.response.source, ResponseSource::Cache);
    assert!(cache.match_in("dynamic-v2", &request).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_entry() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    let request = get("http://localhost/");
    cache.put("dynamic-v2", &request, &page("old")).unwrap();
    cache.put("dynamic-v2", &request, &page("new")).unwrap();

    let hit = cache.match_in("dynamic-v2", &request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"new");
    assert_eq!(cache.len("dynamic-v2").unwrap(), 1);
  }

  #[test]
  fn test_match_any_prefers_oldest_generation() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    let request = get("http://localhost/offline.html");
    cache.open("static-v2").unwrap();
    cache.put("dynamic-v2", &request, &page("dynamic")).unwrap();
    cache.put("static-v2", &request, &page("static")).unwrap();

    let hit = cache.match_any(&request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"static");
  }

  #[test]
  fn test_delete_removes_generation_and_entries() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    let request = get("http://localhost/app.js");
    cache.put("static-v1", &request, &page("js")).unwrap();

    assert!(cache.delete("static-v1").unwrap());
    assert!(!cache.delete("static-v1").unwrap());
    assert!(!cache.has("static-v1").unwrap());
    assert!(cache.match_any(&request).unwrap().is_none());
  }

  #[test]
  fn test_keys_in_creation_order() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    cache.open("static-v2").unwrap();
    cache.open("dynamic-v2").unwrap();
    cache.open("static-v2").unwrap();
    cache.open("data-v2").unwrap();

    assert_eq!(
      cache.keys().unwrap(),
      vec!["static-v2", "dynamic-v2", "data-v2"]
    );
  }

  #[test]
  fn test_rejects_non_get_requests() {
    let cache = SqliteBlobCache::open_in_memory().unwrap();
    let request = Request::new(Method::POST, Url::parse("http://localhost/doctors").unwrap());
    assert!(cache.put("data-v2", &request, &page("x")).is_err());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(db::CACHE_DB);
    let request = get("http://localhost/manifest.json");

    {
      let cache = SqliteBlobCache::open_at(&path).unwrap();
      cache.put("static-v2", &request, &page("{}")).unwrap();
    }

    let cache = SqliteBlobCache::open_at(&path).unwrap();
    let hit = cache.match_in("static-v2", &request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"{}");
  }
}
