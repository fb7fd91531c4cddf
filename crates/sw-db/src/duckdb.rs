//! DuckDB connection implementation

use crate::error::{DbError, DbResult};
use crate::traits::{Connection, Row, SqlValue};
use chrono::DateTime;
use duckdb::params_from_iter;
use duckdb::types::{TimeUnit, ToSql, ToSqlOutput, Value, ValueRef};
use std::path::Path;

const PRODUCT_NAME: &str = "DuckDB";

const MEMORY_TARGET: &str = ":memory:";

/// DuckDB connection
///
/// DuckDB itself always autocommits; with autocommit off a transaction is
/// opened lazily before the first statement and closed by `commit` or
/// `rollback`.
pub struct DuckDbConnection {
    conn: duckdb::Connection,
    url: String,
    user: Option<String>,
    autocommit: bool,
    in_txn: bool,
}

impl DuckDbConnection {
    fn wrap(conn: duckdb::Connection, url: String) -> Self {
        Self {
            conn,
            url,
            user: None,
            autocommit: true,
            in_txn: false,
        }
    }

    /// Create a new in-memory DuckDB database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = duckdb::Connection::open_in_memory().map_err(|e| DbError::Open {
            target: MEMORY_TARGET.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::wrap(conn, format!("duckdb:{MEMORY_TARGET}")))
    }

    /// Open (or create) a DuckDB database file
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = duckdb::Connection::open(path)
            .map_err(|e| DbError::Open {
                target: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::wrap(conn, format!("duckdb:{}", path.display())))
    }

    /// Open from a URL: `duckdb:<path>`, `duckdb::memory:`, `:memory:` or a
    /// bare path.
    pub fn new(url: &str) -> DbResult<Self> {
        let target = url.strip_prefix("duckdb:").unwrap_or(url);
        if target.is_empty() || target == MEMORY_TARGET {
            Self::open_in_memory()
        } else {
            Self::open(Path::new(target))
        }
    }

    /// Principal reported by [`Connection::user`].
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Another connection to the same database.
    pub fn try_clone(&self) -> DbResult<Self> {
        let conn = self
            .conn
            .try_clone()
            .map_err(|e| DbError::Open {
                target: self.url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            conn,
            url: self.url.clone(),
            user: self.user.clone(),
            autocommit: true,
            in_txn: false,
        })
    }

    fn ensure_transaction(&mut self) -> DbResult<()> {
        if !self.autocommit && !self.in_txn {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_txn = true;
        }
        Ok(())
    }

    fn end_transaction(&mut self, sql: &str) -> DbResult<()> {
        if !self.in_txn {
            return Ok(());
        }
        // DuckDB closes the transaction even when COMMIT fails
        self.in_txn = false;
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Connection for DuckDbConnection {
    fn product_name(&self) -> &str {
        PRODUCT_NAME
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.ensure_transaction()?;
        let mut stmt = self.conn.prepare(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.ensure_transaction()?;
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let column_count = rows.as_ref().map(|s| s.column_count()).unwrap_or(0);

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                let value: Value = row.get(index)?;
                values.push(from_duckdb_value(value));
            }
            result.push(Row::new(values));
        }
        Ok(result)
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()> {
        if autocommit && !self.autocommit {
            self.end_transaction("COMMIT")?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.end_transaction("ROLLBACK")
    }

    fn table_exists(&mut self, schema: Option<&str>, table: &str) -> DbResult<bool> {
        let rows = match schema {
            Some(schema) => self.query(
                "select count(*) from information_schema.tables \
                 where lower(table_schema) = lower(?) and lower(table_name) = lower(?)",
                &[schema.into(), table.into()],
            )?,
            None => self.query(
                "select count(*) from information_schema.tables \
                 where table_schema = current_schema() and lower(table_name) = lower(?)",
                &[table.into()],
            )?,
        };
        count_positive(&rows)
    }

    fn schema_exists(&mut self, schema: &str) -> DbResult<bool> {
        let rows = self.query(
            "select count(*) from information_schema.schemata where lower(schema_name) = lower(?)",
            &[schema.into()],
        )?;
        count_positive(&rows)
    }

    fn create_schema(&mut self, schema: &str) -> DbResult<()> {
        self.execute(&format!("create schema if not exists {schema}"), &[])?;
        Ok(())
    }

    fn set_schema(&mut self, schema: &str) -> DbResult<()> {
        self.execute(&format!("set schema = '{schema}'"), &[])?;
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        false
    }

    fn savepoint(&mut self, _name: &str) -> DbResult<()> {
        Err(DbError::Unsupported {
            backend: PRODUCT_NAME,
            feature: "savepoints",
        })
    }
}

fn count_positive(rows: &[Row]) -> DbResult<bool> {
    match rows.first() {
        Some(row) => Ok(row.get_i64(0)? > 0),
        None => Ok(false),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(value) => ToSqlOutput::Owned(Value::BigInt(*value)),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            SqlValue::Timestamp(ts) => ToSqlOutput::Owned(Value::Timestamp(
                TimeUnit::Microsecond,
                ts.and_utc().timestamp_micros(),
            )),
        })
    }
}

fn from_duckdb_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Int(i64::from(b)),
        Value::TinyInt(v) => SqlValue::Int(i64::from(v)),
        Value::SmallInt(v) => SqlValue::Int(i64::from(v)),
        Value::Int(v) => SqlValue::Int(i64::from(v)),
        Value::BigInt(v) => SqlValue::Int(v),
        Value::UTinyInt(v) => SqlValue::Int(i64::from(v)),
        Value::USmallInt(v) => SqlValue::Int(i64::from(v)),
        Value::UInt(v) => SqlValue::Int(i64::from(v)),
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Int(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::UBigInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Int(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::Text(text) => SqlValue::Text(text),
        Value::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            match DateTime::from_timestamp_micros(micros) {
                Some(dt) => SqlValue::Timestamp(dt.naive_utc()),
                None => SqlValue::Null,
            }
        }
        other => SqlValue::Text(format!("{other:?}")),
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
