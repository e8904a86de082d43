//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A row referenced by id does not exist.
    #[error("{table} row not found: {id}")]
    RowNotFound { table: &'static str, id: i64 },

    /// A unique key would be duplicated.
    #[error("duplicate {table} row: {key}")]
    DuplicateRow { table: &'static str, key: String },

    /// A foreign key points to a missing row.
    #[error("constraint violation on {table}: {message}")]
    ConstraintViolation {
        table: &'static str,
        message: String,
    },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Transaction error (lock failure, commit failure, use after finish).
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
