use thiserror::Error;

/// Errors surfaced by the embedded state store.
///
/// Matches the taxonomy in the system's error-handling design: callers
/// distinguish `NotFound`/`StaleVersion`/`LockTimeout` programmatically
/// rather than matching on message text.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: String },

    #[error("stale version for {collection}/{id}: expected {expected}, found {actual}")]
    StaleVersion {
        collection: &'static str,
        id: String,
        expected: i64,
        actual: i64,
    },

    #[error("advisory lock not acquired within deadline for {path}")]
    LockTimeout { path: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation not implemented: {0}")]
    Unimplemented(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;
