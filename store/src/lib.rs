//! Embedded relational state store.
//!
//! Every workspace-scoped entity (tasks, phases, agents, reviews, handovers,
//! findings) is persisted here: a bundled SQLite database opened in
//! write-ahead-log mode, plus a legacy JSON mirror kept for human inspection
//! and crash recovery, guarded by an advisory file lock. The database is the
//! authoritative source; the JSON mirror is derived and can always be
//! rebuilt from it (or, if the database is lost, the database can be rebuilt
//! from the mirror plus the JSONL audit trail via `reconcile`).

mod error;
mod filter;
mod lock;
mod sqlite_store;

pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FilterOp, IndexValue};
pub use lock::{LockGuard, LockMode, with_file_lock};
pub use sqlite_store::Store;

use std::collections::HashMap;

/// Current Unix time in milliseconds. Centralized so every caller agrees on
/// a single clock source and representation.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A type persisted in the store. Implementors provide their own identity,
/// collection name, and the subset of fields that should be queryable via
/// `Filter` without a full table scan.
pub trait Record: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key, unique within `collection_name()`.
    fn id(&self) -> &str;

    /// Last-modified timestamp (ms since epoch); used for optimistic ordering
    /// and for detecting stale reads.
    fn updated_at(&self) -> i64;

    /// Name of the SQLite table (and JSONL audit stream) this record lives in.
    fn collection_name() -> &'static str;

    /// Fields to mirror into indexed columns for equality-filtered queries.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
