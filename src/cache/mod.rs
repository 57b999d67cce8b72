//! Versioned blob cache for captured responses.
//!
//! This module provides the request → response containers that back the
//! caching strategies:
//! - Named generations per role (static, dynamic, data) and deployed version
//! - Entries keyed by method + URL, body ignored
//! - SQLite persistence so entries survive restarts

mod generation;
mod storage;
mod traits;

pub use generation::{CacheRole, Generations};
pub use storage::SqliteBlobCache;
pub use traits::{BlobCache, CachedResponse};
