//! A single history table row.

use crate::error::{MigrationError, MigrationResult};
use chrono::NaiveDateTime;
use sw_core::{MigrationVersion, VersionKind};
use sw_db::{Row, SqlValue};

/// Status recorded for every applied migration.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Comment of the reserved id-0 row while no lock is held.
pub const INIT_COMMENT: &str = "<init>";

/// Columns in the order every read, insert and seed uses.
pub const COLUMNS: &str =
    "id, mtype, mstatus, mversion, mcomment, mchecksum, run_on, run_by, run_time";

/// An applied migration as recorded in the history table.
///
/// Rows are values: re-running or resetting a checksum yields a new row that
/// replaces the old one.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    id: i64,
    version: MigrationVersion,
    status: String,
    checksum: i32,
    run_on: Option<NaiveDateTime>,
    run_by: String,
    run_time_ms: i64,
}

impl HistoryRow {
    pub fn new(
        id: i64,
        version: MigrationVersion,
        checksum: i32,
        run_by: impl Into<String>,
        run_time_ms: i64,
    ) -> Self {
        Self {
            id,
            version,
            status: STATUS_SUCCESS.to_string(),
            checksum,
            run_on: Some(now()),
            run_by: run_by.into(),
            run_time_ms,
        }
    }

    /// Decode a row selected with [`COLUMNS`].
    pub fn from_row(row: &Row) -> MigrationResult<Self> {
        let id = row.get_i64(0)?;
        let code = row.get_string(1)?;
        let kind = VersionKind::from_code(&code).ok_or_else(|| MigrationError::InvalidHistory {
            id,
            message: format!("unknown migration type '{code}'"),
        })?;
        let mversion = row.get_string(3)?;
        let comment = row.get_string(4)?;
        let version = MigrationVersion::from_history(kind, &mversion, &comment).map_err(|e| {
            MigrationError::InvalidHistory {
                id,
                message: e.to_string(),
            }
        })?;
        let checksum = row.get_i64(5)?;
        let checksum = i32::try_from(checksum).map_err(|_| MigrationError::InvalidHistory {
            id,
            message: format!("checksum {checksum} out of range"),
        })?;
        Ok(Self {
            id,
            version,
            status: row.get_string(2)?,
            checksum,
            run_on: row.get_timestamp(6)?,
            run_by: row.get_string(7)?,
            run_time_ms: row.get_i64(8)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn version(&self) -> &MigrationVersion {
        &self.version
    }

    pub fn kind(&self) -> VersionKind {
        self.version.kind()
    }

    pub fn key(&self) -> String {
        self.version.key()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn checksum(&self) -> i32 {
        self.checksum
    }

    pub fn run_on(&self) -> Option<NaiveDateTime> {
        self.run_on
    }

    pub fn run_by(&self) -> &str {
        &self.run_by
    }

    pub fn run_time_ms(&self) -> i64 {
        self.run_time_ms
    }

    /// The reserved id-0 row seeded with the table.
    pub fn is_sentinel(&self) -> bool {
        self.id == 0
    }

    /// Replacement row after a re-run.
    pub fn rerun(&self, checksum: i32, run_by: &str, run_time_ms: i64) -> Self {
        Self {
            checksum,
            run_on: Some(now()),
            run_by: run_by.to_string(),
            run_time_ms,
            ..self.clone()
        }
    }

    /// Replacement row carrying a new checksum only.
    pub fn with_checksum(&self, checksum: i32) -> Self {
        Self {
            checksum,
            ..self.clone()
        }
    }

    /// Parameters for an insert using [`COLUMNS`].
    pub fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Int(self.id),
            SqlValue::Text(self.kind().code().to_string()),
            SqlValue::Text(self.status.clone()),
            SqlValue::Text(self.version.normalised()),
            SqlValue::Text(self.version.comment().to_string()),
            SqlValue::Int(i64::from(self.checksum)),
            SqlValue::from(self.run_on),
            SqlValue::Text(self.run_by.clone()),
            SqlValue::Int(self.run_time_ms),
        ]
    }
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}
