//! Error types for sw-db

use thiserror::Error;

/// Failures reported by a migration connection
#[derive(Error, Debug)]
pub enum DbError {
    /// D001: The database could not be opened
    #[error("[D001] Failed to open database '{target}': {message}")]
    Open { target: String, message: String },

    /// D002: A statement was rejected
    #[error("[D002] Statement failed: {0}")]
    Statement(String),

    /// D003: A statement referenced a table or view that does not exist
    #[error("[D003] Table or view does not exist: {0}")]
    MissingTable(String),

    /// D004: A concurrent transaction wrote the same rows or catalog entry
    #[error("[D004] Write conflict with a concurrent transaction: {0}")]
    Conflict(String),

    /// D005: The backend lacks a connection capability
    #[error("[D005] {backend} does not support {feature}")]
    Unsupported {
        backend: &'static str,
        feature: &'static str,
    },

    /// D006: Column value has an unexpected type
    #[error("[D006] Cannot read column {index} as {expected}: found {found}")]
    Conversion {
        index: usize,
        expected: &'static str,
        found: String,
    },

    /// D007: Column index past the end of a row
    #[error("[D007] Column {index} out of range for a row of {width} columns")]
    ColumnOutOfRange { index: usize, width: usize },
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// The caller may retry after rolling back.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_))
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        // duckdb::Error has no catalog or transaction variants; the message
        // is all there is to go on.
        let message = err.to_string();
        if is_missing_table(&message) {
            DbError::MissingTable(message)
        } else if is_conflict(&message) {
            DbError::Conflict(message)
        } else {
            DbError::Statement(message)
        }
    }
}

fn is_conflict(message: &str) -> bool {
    message.contains("TransactionContext Error") || message.to_lowercase().contains("conflict")
}

fn is_missing_table(message: &str) -> bool {
    message.contains("Table with name")
        || message.contains("View with name")
        || message.contains("Table or view with name")
}
