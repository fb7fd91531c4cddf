//! Connection trait definition

use crate::error::{DbError, DbResult};
use chrono::NaiveDateTime;

/// A value bound to a `?` parameter or read back from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Short type name used in conversion errors.
    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Int(_) => "integer",
            SqlValue::Text(_) => "text",
            SqlValue::Timestamp(_) => "timestamp",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    fn column(&self, index: usize) -> DbResult<&SqlValue> {
        self.values.get(index).ok_or_else(|| {
            DbError::ColumnOutOfRange {
                index,
                width: self.values.len(),
            }
        })
    }

    /// Integer column; numeric text is accepted.
    pub fn get_i64(&self, index: usize) -> DbResult<i64> {
        match self.column(index)? {
            SqlValue::Int(value) => Ok(*value),
            SqlValue::Text(text) => text.trim().parse().map_err(|_| DbError::Conversion {
                index,
                expected: "integer",
                found: format!("'{text}'"),
            }),
            other => Err(DbError::Conversion {
                index,
                expected: "integer",
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Text column; integers are rendered, null is `None`.
    pub fn get_opt_string(&self, index: usize) -> DbResult<Option<String>> {
        match self.column(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(text) => Ok(Some(text.clone())),
            SqlValue::Int(value) => Ok(Some(value.to_string())),
            SqlValue::Timestamp(ts) => Ok(Some(ts.to_string())),
        }
    }

    /// Text column with null read as the empty string.
    pub fn get_string(&self, index: usize) -> DbResult<String> {
        Ok(self.get_opt_string(index)?.unwrap_or_default())
    }

    pub fn get_timestamp(&self, index: usize) -> DbResult<Option<NaiveDateTime>> {
        match self.column(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            other => Err(DbError::Conversion {
                index,
                expected: "timestamp",
                found: other.type_name().to_string(),
            }),
        }
    }
}

/// A blocking database connection driven by the migration engine.
///
/// Parameters are positional `?` markers bound from `params` in order.
/// With autocommit off, statements run in a transaction that lasts until
/// `commit` or `rollback`.
pub trait Connection {
    /// Product name as reported by the driver (e.g. `PostgreSQL`, `DuckDB`)
    fn product_name(&self) -> &str;

    /// Connection URL, used to derive named lock identities
    fn url(&self) -> &str;

    /// Authenticated user, if known
    fn user(&self) -> Option<&str>;

    /// Execute a statement, returning the number of affected rows
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;

    /// Run a query and collect every row
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    fn autocommit(&self) -> bool;

    /// Switch autocommit; turning it on commits any open transaction
    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;

    /// Check for a table, in `schema` or the current schema when `None`
    fn table_exists(&mut self, schema: Option<&str>, table: &str) -> DbResult<bool>;

    fn schema_exists(&mut self, schema: &str) -> DbResult<bool>;

    fn create_schema(&mut self, schema: &str) -> DbResult<()> {
        self.execute(&format!("create schema {schema}"), &[])?;
        Ok(())
    }

    /// Make `schema` the connection's current schema
    fn set_schema(&mut self, schema: &str) -> DbResult<()>;

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn savepoint(&mut self, name: &str) -> DbResult<()> {
        self.execute(&format!("savepoint {name}"), &[])?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.execute(&format!("release savepoint {name}"), &[])?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.execute(&format!("rollback to savepoint {name}"), &[])?;
        Ok(())
    }
}
