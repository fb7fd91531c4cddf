//! Shared test utilities for sw-migrate
//!
//! [`ScriptedConnection`] is a `Connection` double that records every
//! statement and answers from canned responses, so vendor lock SQL can be
//! checked without the vendor's database.

use std::collections::{HashMap, HashSet, VecDeque};
use sw_db::{Connection, DbError, DbResult, Row, SqlValue};

/// A canned answer for statements containing a pattern.
#[derive(Debug, Clone)]
pub enum Response {
    Rows(Vec<Row>),
    Affected(usize),
    Error(String),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    responses: VecDeque<Response>,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Connection double driven by pattern rules.
///
/// Rules match by case-insensitive substring, first registered wins. A
/// rule's responses are consumed in order and the last one repeats.
/// Unmatched queries return no rows; unmatched executes affect one row.
#[derive(Debug)]
pub struct ScriptedConnection {
    product: String,
    url: String,
    user: Option<String>,
    autocommit: bool,
    savepoints: bool,
    rules: Vec<Rule>,
    tables: HashSet<String>,
    /// Tables another session has yet to commit, with the checks left
    pending_tables: HashMap<String, usize>,
    schemas: HashSet<String>,
    calls: Vec<Call>,
}

impl ScriptedConnection {
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            url: format!("scripted:{}", product.to_lowercase()),
            user: None,
            autocommit: true,
            savepoints: true,
            rules: Vec::new(),
            tables: HashSet::new(),
            pending_tables: HashMap::new(),
            schemas: HashSet::new(),
            calls: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_savepoints(mut self, savepoints: bool) -> Self {
        self.savepoints = savepoints;
        self
    }

    /// Mark a table as existing.
    pub fn with_table(mut self, table: &str) -> Self {
        self.tables.insert(table.to_lowercase());
        self
    }

    /// Mark a table as created elsewhere but uncommitted: the first
    /// `checks` existence checks miss it.
    pub fn with_table_after(mut self, table: &str, checks: usize) -> Self {
        self.pending_tables.insert(table.to_lowercase(), checks);
        self
    }

    /// Answer statements containing `pattern` with `responses`, in order.
    pub fn on(mut self, pattern: &str, responses: Vec<Response>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_lowercase(),
            responses: responses.into(),
        });
        self
    }

    pub fn on_query(self, pattern: &str, rows: Vec<Row>) -> Self {
        self.on(pattern, vec![Response::Rows(rows)])
    }

    pub fn fail_on(self, pattern: &str, message: &str) -> Self {
        self.on(pattern, vec![Response::Error(message.to_string())])
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Recorded statement texts, including `COMMIT`/`ROLLBACK` markers.
    pub fn statements(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.sql.as_str()).collect()
    }

    /// Number of recorded statements containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        let pattern = pattern.to_lowercase();
        self.calls
            .iter()
            .filter(|c| c.sql.to_lowercase().contains(&pattern))
            .count()
    }

    fn record(&mut self, sql: &str, params: &[SqlValue]) {
        self.calls.push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn respond(&mut self, sql: &str) -> Option<Response> {
        let lower = sql.to_lowercase();
        let rule = self
            .rules
            .iter_mut()
            .find(|rule| lower.contains(&rule.pattern))?;
        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }

    fn track_ddl(&mut self, sql: &str) {
        let lower = sql.trim().to_lowercase();
        if let Some(rest) = lower.strip_prefix("create table ") {
            if let Some(name) = rest.split_whitespace().next() {
                let name = name.trim_end_matches('(');
                let unqualified = name.rsplit('.').next().unwrap_or(name);
                self.tables.insert(unqualified.to_string());
            }
        }
    }
}

impl Connection for ScriptedConnection {
    fn product_name(&self) -> &str {
        &self.product
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.record(sql, params);
        match self.respond(sql) {
            Some(Response::Error(message)) => Err(failure(message)),
            Some(Response::Affected(n)) => {
                self.track_ddl(sql);
                Ok(n)
            }
            Some(Response::Rows(rows)) => Ok(rows.len()),
            None => {
                self.track_ddl(sql);
                Ok(1)
            }
        }
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.record(sql, params);
        match self.respond(sql) {
            Some(Response::Error(message)) => Err(failure(message)),
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Affected(_)) | None => Ok(Vec::new()),
        }
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()> {
        self.autocommit = autocommit;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }

    fn table_exists(&mut self, _schema: Option<&str>, table: &str) -> DbResult<bool> {
        let name = table.to_lowercase();
        match self.pending_tables.get_mut(&name) {
            Some(0) => {
                self.pending_tables.remove(&name);
                self.tables.insert(name.clone());
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Ok(self.tables.contains(&name))
    }

    fn schema_exists(&mut self, schema: &str) -> DbResult<bool> {
        Ok(self.schemas.contains(&schema.to_lowercase()))
    }

    fn create_schema(&mut self, schema: &str) -> DbResult<()> {
        self.record(&format!("create schema {schema}"), &[]);
        self.schemas.insert(schema.to_lowercase());
        Ok(())
    }

    fn set_schema(&mut self, schema: &str) -> DbResult<()> {
        self.record(&format!("set schema {schema}"), &[]);
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        self.savepoints
    }
}

/// Conflict when the message says so, as the DuckDB backend classifies it.
fn failure(message: String) -> DbError {
    if message.to_lowercase().contains("conflict") {
        DbError::Conflict(message)
    } else {
        DbError::Statement(message)
    }
}

/// A single-row result.
pub fn row(values: Vec<SqlValue>) -> Row {
    Row::new(values)
}

/// A single-column integer result row.
pub fn int_row(value: i64) -> Row {
    Row::new(vec![SqlValue::Int(value)])
}
