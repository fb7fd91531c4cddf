//! Error types for sw-migrate

use sw_core::CoreError;
use sw_db::DbError;
use thiserror::Error;

/// Broad category of a migration failure, for callers that react
/// differently to each (e.g. patch and retry on a checksum mismatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local migrations disagree with the recorded history
    Validation,
    /// The runner or a migration is misconfigured
    Configuration,
    /// A migration failed to run
    Execution,
    /// The history lock could not be acquired
    Lock,
    /// The database rejected an engine operation
    Database,
}

/// Migration error type
#[derive(Error, Debug)]
pub enum MigrationError {
    /// MG001: Runner configuration is unusable
    #[error("[MG001] Migration configuration error: {0}")]
    Config(String),

    /// MG002: Recorded checksum differs from the local migration
    #[error(
        "[MG002] Checksum mismatch for migration '{key}' ({location}): \
         recorded {recorded}, local {local}"
    )]
    ChecksumMismatch {
        key: String,
        location: String,
        recorded: i32,
        local: i32,
    },

    /// MG003: Database is below the configured minimum version
    #[error("[MG003] {message} (database version {actual}, required {required})")]
    MinVersion {
        message: String,
        actual: String,
        required: String,
    },

    /// MG004: A migration statement failed
    #[error("[MG004] Migration '{location}' failed: {source}\n  statement: {statement}")]
    Execution {
        location: String,
        statement: String,
        #[source]
        source: DbError,
    },

    /// MG005: Lock not acquired within the configured attempts
    #[error("[MG005] Failed to acquire migration lock on '{table}' after {attempts} attempts")]
    LockTimeout { table: String, attempts: u32 },

    /// MG006: No factory entry for a programmatic migration
    #[error("[MG006] No programmatic migration registered for '{id}' ({location})")]
    UnknownProgrammatic { id: String, location: String },

    /// MG007: A programmatic migration returned an error
    #[error("[MG007] Programmatic migration '{location}' failed: {message}")]
    Programmatic { location: String, message: String },

    /// MG008: A history row could not be interpreted
    #[error("[MG008] Invalid history row {id}: {message}")]
    InvalidHistory { id: i64, message: String },

    /// MG009: Core error propagation
    #[error("[MG009] Core error: {0}")]
    Core(#[from] CoreError),

    /// MG010: Database error propagation
    #[error("[MG010] Database error: {0}")]
    Db(#[from] DbError),
}

impl MigrationError {
    /// A concurrent transaction won a write race; retrying may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MigrationError::Db(err) if err.is_conflict())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Config(_) | MigrationError::UnknownProgrammatic { .. } => {
                ErrorKind::Configuration
            }
            MigrationError::ChecksumMismatch { .. } | MigrationError::MinVersion { .. } => {
                ErrorKind::Validation
            }
            MigrationError::Execution { .. } | MigrationError::Programmatic { .. } => {
                ErrorKind::Execution
            }
            MigrationError::LockTimeout { .. } => ErrorKind::Lock,
            MigrationError::InvalidHistory { .. } | MigrationError::Db(_) => ErrorKind::Database,
            MigrationError::Core(err) => match err {
                CoreError::ResourceLoad { .. } | CoreError::IoWithPath { .. } => {
                    ErrorKind::Execution
                }
                _ => ErrorKind::Configuration,
            },
        }
    }
}

/// Result type alias for MigrationError
pub type MigrationResult<T> = Result<T, MigrationError>;
