//! SQLite connection helpers shared by the blob cache and the record store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// File name of the blob cache database inside the data directory.
pub const CACHE_DB: &str = "caches.db";

/// File name of the structured record store inside the data directory.
pub const STORE_DB: &str = "records.db";

/// Open or create a database file, creating its parent directory first.
pub fn open_file(path: &Path) -> Result<Connection> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))
}

/// Open a private in-memory database.
#[cfg(test)]
pub fn open_memory() -> Result<Connection> {
  Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))
}

/// Get the default data directory
pub fn default_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("medcache"))
}

/// Lock a shared connection.
pub fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// Parse a datetime string from SQLite format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
