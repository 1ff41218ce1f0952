use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("version mismatch on {record_id}: expected {expected}, found {actual}")]
    VersionMismatch {
        record_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("core error: {0}")]
    Core(#[from] curator_core::CoreError),
}
