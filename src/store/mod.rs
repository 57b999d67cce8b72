//! Structured local store for API records used as offline fallback.
//!
//! Holds the `appointments`, `doctors` and `patients` collections keyed by
//! `id`, with secondary indexes for lookups by foreign key or date. Records
//! persist until explicitly deleted or cleared.

mod layer;
mod record;
mod schema;
mod sqlite;

pub use layer::LocalStore;
pub use record::{Record, RecordId};
pub use schema::Collection;
pub use sqlite::{RecordBackend, SqliteRecords};
