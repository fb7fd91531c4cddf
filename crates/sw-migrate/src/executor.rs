//! Statement execution for split migration scripts.

use crate::error::{MigrationError, MigrationResult};
use sw_db::Connection;

/// Runs the statements of one migration script.
///
/// In the default mode the first failure is returned. In tolerant mode
/// failures are logged and the remaining statements still run.
#[derive(Debug, Clone)]
pub struct DdlRunner<'a> {
    location: &'a str,
    tolerate_errors: bool,
}

impl<'a> DdlRunner<'a> {
    pub fn new(location: &'a str) -> Self {
        Self {
            location,
            tolerate_errors: false,
        }
    }

    pub fn tolerant(mut self, tolerate_errors: bool) -> Self {
        self.tolerate_errors = tolerate_errors;
        self
    }

    /// Execute `statements` in order, returning how many succeeded.
    pub fn run_all(
        &self,
        conn: &mut dyn Connection,
        statements: &[String],
    ) -> MigrationResult<usize> {
        let mut succeeded = 0;
        for statement in statements {
            log::debug!("Executing {}: {}", self.location, statement);
            match conn.execute(statement, &[]) {
                Ok(_) => succeeded += 1,
                Err(e) if self.tolerate_errors => {
                    log::warn!(
                        "Ignoring failed statement in {}: {}\n  statement: {}",
                        self.location,
                        e,
                        statement
                    );
                }
                Err(e) => {
                    log::error!("Statement in {} failed: {}", self.location, e);
                    return Err(MigrationError::Execution {
                        location: self.location.to_string(),
                        statement: statement.clone(),
                        source: e,
                    });
                }
            }
        }
        Ok(succeeded)
    }
}

/// Non-transactional statements held back until after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredScript {
    pub location: String,
    pub statements: Vec<String>,
    /// Failures are logged rather than returned
    pub allow_error: bool,
}

impl DeferredScript {
    pub fn run(&self, conn: &mut dyn Connection) -> MigrationResult<usize> {
        DdlRunner::new(&self.location)
            .tolerant(self.allow_error)
            .run_all(conn, &self.statements)
    }
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
