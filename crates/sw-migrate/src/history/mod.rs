//! Migration history: recorded rows and the state machine applying local
//! migrations against them.

pub mod row;
pub mod table;

pub use row::HistoryRow;
pub use table::{
    decide, local_checksum, Action, ApplyOutcome, Decision, HistoryTable, MigrationSummary, Step,
};
