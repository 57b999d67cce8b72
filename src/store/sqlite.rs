//! Record backend trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::record::{Record, RecordId};
use super::schema::{Collection, SCHEMA_VERSION};
use crate::db;

/// Trait for record storage backends.
pub trait RecordBackend: Send + Sync + 'static {
  /// Insert or overwrite a record by its key.
  fn put(&self, collection: Collection, record: &Record) -> Result<()>;

  /// Insert or overwrite several records in one transaction.
  fn put_many(&self, collection: Collection, records: &[Record]) -> Result<()>;

  fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>>;

  /// All records, ordered by key.
  fn get_all(&self, collection: Collection) -> Result<Vec<Record>>;

  /// Records whose indexed field equals `value`, ordered by key.
  fn find_by_index(&self, collection: Collection, index: &str, value: &Value)
    -> Result<Vec<Record>>;

  /// Remove a record. Removing a missing key is not an error.
  fn delete(&self, collection: Collection, id: &RecordId) -> Result<()>;

  fn clear(&self, collection: Collection) -> Result<()>;
}

/// SQLite-based record storage.
pub struct SqliteRecords {
  conn: Mutex<Connection>,
}

impl SqliteRecords {
  /// Open the record database at `path`, upgrading its schema if needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::with_connection(db::open_file(path)?)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(db::open_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.upgrade()?;
    Ok(storage)
  }

  /// Bring the schema up to `SCHEMA_VERSION`.
  ///
  /// Only ever creates tables, collections and indexes; nothing is dropped.
  fn upgrade(&self) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;

    let current: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    for collection in Collection::ALL {
      tx.execute(
        "INSERT OR IGNORE INTO collections (name, key_field) VALUES (?, ?)",
        params![collection.as_str(), collection.key_field()],
      )
      .map_err(|e| eyre!("Failed to register collection {}: {}", collection, e))?;

      for index in collection.indexes() {
        tx.execute(
          "INSERT OR IGNORE INTO collection_indexes (collection, name, field, is_unique)
           VALUES (?, ?, ?, ?)",
          params![collection.as_str(), index.name, index.field, index.unique],
        )
        .map_err(|e| eyre!("Failed to register index {}.{}: {}", collection, index.name, e))?;
      }
    }

    if current < SCHEMA_VERSION {
      tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| eyre!("Failed to set schema version: {}", e))?;
      info!(from = current, to = SCHEMA_VERSION, "Upgraded record store schema");
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Schema for record tables.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    key_field TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS collection_indexes (
    collection TEXT NOT NULL,
    name TEXT NOT NULL,
    field TEXT NOT NULL,
    is_unique INTEGER NOT NULL,
    PRIMARY KEY (collection, name)
);

-- Records stored as serialized JSON objects
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_key)
);

-- Secondary index values, one row per (index, record)
CREATE TABLE IF NOT EXISTS index_entries (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    value TEXT NOT NULL,
    record_key TEXT NOT NULL,
    is_unique INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (collection, index_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_index_entries_value
    ON index_entries(collection, index_name, value);

CREATE UNIQUE INDEX IF NOT EXISTS idx_index_entries_unique
    ON index_entries(collection, index_name, value) WHERE is_unique = 1;
"#;

/// Write one record and its index entries inside an open transaction.
fn write_record(tx: &Transaction<'_>, collection: Collection, record: &Record) -> Result<()> {
  let key_field = collection.key_field();
  let id = record
    .key(key_field)
    .ok_or_else(|| eyre!("Record in {} has no usable '{}' field", collection, key_field))?;
  let record_key = id.storage_key();
  let data =
    serde_json::to_string(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

  tx.execute(
    "DELETE FROM index_entries WHERE collection = ? AND record_key = ?",
    params![collection.as_str(), record_key],
  )
  .map_err(|e| eyre!("Failed to clear index entries: {}", e))?;

  tx.execute(
    "INSERT OR REPLACE INTO records (collection, record_key, data, updated_at)
     VALUES (?, ?, ?, datetime('now'))",
    params![collection.as_str(), record_key, data],
  )
  .map_err(|e| eyre!("Failed to store record {} in {}: {}", id, collection, e))?;

  for index in collection.indexes() {
    // Records without the field are simply absent from the index
    let value = match record.field(index.field) {
      Some(Value::Null) | None => continue,
      Some(value) => value.to_string(),
    };

    tx.execute(
      "INSERT INTO index_entries (collection, index_name, value, record_key, is_unique)
       VALUES (?, ?, ?, ?, ?)",
      params![
        collection.as_str(),
        index.name,
        value,
        record_key,
        index.unique
      ],
    )
    .map_err(|e| {
      eyre!(
        "Failed to index {} of record {} in {}: {}",
        index.name,
        id,
        collection,
        e
      )
    })?;
  }

  Ok(())
}

fn decode_records(rows: Vec<String>, collection: Collection) -> Result<Vec<Record>> {
  let mut records = rows
    .iter()
    .map(|data| {
      serde_json::from_str::<Record>(data)
        .map_err(|e| eyre!("Failed to deserialize record: {}", e))
    })
    .collect::<Result<Vec<_>>>()?;

  let key_field = collection.key_field();
  records.sort_by_key(|record| record.key(key_field));
  Ok(records)
}

impl RecordBackend for SqliteRecords {
  fn put(&self, collection: Collection, record: &Record) -> Result<()> {
    self.put_many(collection, std::slice::from_ref(record))
  }

  fn put_many(&self, collection: Collection, records: &[Record]) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for record in records {
      write_record(&tx, collection, record)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
    let conn = db::lock(&self.conn)?;

    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![collection.as_str(), id.storage_key()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to get record {} from {}: {}", id, collection, e))?;

    data
      .map(|data| {
        serde_json::from_str(&data).map_err(|e| eyre!("Failed to deserialize record: {}", e))
      })
      .transpose()
  }

  fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE collection = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![collection.as_str()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read record: {}", e))?;

    decode_records(rows, collection)
  }

  fn find_by_index(
    &self,
    collection: Collection,
    index: &str,
    value: &Value,
  ) -> Result<Vec<Record>> {
    if collection.index(index).is_none() {
      return Err(eyre!("Collection {} has no index named {}", collection, index));
    }

    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT r.data FROM records r
         INNER JOIN index_entries i ON i.collection = r.collection AND i.record_key = r.record_key
         WHERE i.collection = ? AND i.index_name = ? AND i.value = ?",
      )
      .map_err(|e| eyre!("Failed to prepare index query: {}", e))?;

    let rows = stmt
      .query_map(
        params![collection.as_str(), index, value.to_string()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to query index {}.{}: {}", collection, index, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read record: {}", e))?;

    decode_records(rows, collection)
  }

  fn delete(&self, collection: Collection, id: &RecordId) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let record_key = id.storage_key();

    tx.execute(
      "DELETE FROM index_entries WHERE collection = ? AND record_key = ?",
      params![collection.as_str(), record_key],
    )
    .map_err(|e| eyre!("Failed to delete index entries: {}", e))?;
    tx.execute(
      "DELETE FROM records WHERE collection = ? AND record_key = ?",
      params![collection.as_str(), record_key],
    )
    .map_err(|e| eyre!("Failed to delete record {} from {}: {}", id, collection, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM index_entries WHERE collection = ?",
      params![collection.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear index entries of {}: {}", collection, e))?;
    tx.execute(
      "DELETE FROM records WHERE collection = ?",
      params![collection.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear {}: {}", collection, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}
