//! sw-db - Database connection layer for Stepwise
//!
//! This crate provides the blocking `Connection` trait the migration engine
//! drives, the `SqlValue`/`Row` types that cross it, and a DuckDB
//! implementation used as the bundled reference engine.

pub mod duckdb;
pub mod error;
pub mod traits;

pub use duckdb::DuckDbConnection;
pub use error::{DbError, DbResult};
pub use traits::{Connection, Row, SqlValue};
