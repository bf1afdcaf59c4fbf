//! Storage error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur in the sample store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite reported an error that is not a constraint violation
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// A referenced record does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness or foreign key constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Interval expression could not be parsed
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        StorageError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// True when the error is a uniqueness conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StorageError::Database(err),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
