use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use super::record::{Record, RecordId};
use super::schema::Collection;
use super::sqlite::RecordBackend;

/// Structured local store that never fails past its boundary.
///
/// Backend errors are logged and turned into `false` or an empty result so
/// callers on the request path can treat the store as best-effort.
pub struct LocalStore<B: RecordBackend> {
  backend: Arc<B>,
}

impl<B: RecordBackend> LocalStore<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  pub fn put(&self, collection: Collection, record: &Record) -> bool {
    match self.backend.put(collection, record) {
      Ok(()) => true,
      Err(e) => {
        error!(%collection, error = %e, "Error saving record");
        false
      }
    }
  }

  /// All-or-nothing write of several records.
  pub fn put_many(&self, collection: Collection, records: &[Record]) -> bool {
    match self.backend.put_many(collection, records) {
      Ok(()) => true,
      Err(e) => {
        error!(%collection, count = records.len(), error = %e, "Error saving records");
        false
      }
    }
  }

  pub fn get(&self, collection: Collection, id: &RecordId) -> Option<Record> {
    self.backend.get(collection, id).unwrap_or_else(|e| {
      error!(%collection, %id, error = %e, "Error getting record");
      None
    })
  }

  pub fn get_all(&self, collection: Collection) -> Vec<Record> {
    self.backend.get_all(collection).unwrap_or_else(|e| {
      error!(%collection, error = %e, "Error getting records");
      Vec::new()
    })
  }

  pub fn find_by_index(&self, collection: Collection, index: &str, value: &Value) -> Vec<Record> {
    self
      .backend
      .find_by_index(collection, index, value)
      .unwrap_or_else(|e| {
        error!(%collection, index, error = %e, "Error querying index");
        Vec::new()
      })
  }

  pub fn delete(&self, collection: Collection, id: &RecordId) -> bool {
    match self.backend.delete(collection, id) {
      Ok(()) => true,
      Err(e) => {
        error!(%collection, %id, error = %e, "Error deleting record");
        false
      }
    }
  }

  pub fn clear(&self, collection: Collection) -> bool {
    match self.backend.clear(collection) {
      Ok(()) => true,
      Err(e) => {
        error!(%collection, error = %e, "Error clearing collection");
        false
      }
    }
  }
}

impl<B: RecordBackend> Clone for LocalStore<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
    }
  }
}
