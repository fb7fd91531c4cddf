//! One migration run against one connection.
//!
//! [`MigrationEngine::run`] owns the transaction boundaries: schema and
//! history table setup commit on their own, the apply phase commits (or rolls
//! back) as a unit under the history lock, and non-transactional statements
//! run afterwards in autocommit mode.

use crate::error::{MigrationError, MigrationResult};
use crate::executor::DeferredScript;
use crate::history::{local_checksum, ApplyOutcome, HistoryTable, MigrationSummary};
use crate::platform::{Platform, LOCK_RETRY_INTERVAL};
use crate::programmatic::MigrationFactory;
use std::collections::HashMap;
use std::thread;
use sw_core::{MigrationConfig, MigrationSet, VersionKind};
use sw_db::Connection;

/// Outcome of a run (or, in check mode, of a dry run).
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub platform: Platform,
    /// Migrations acted on, in the order they were applied
    pub summaries: Vec<MigrationSummary>,
    /// History matched the local checksums; nothing was locked or read
    pub fast_path: bool,
    /// A missing precondition stopped the run early
    pub halted: bool,
}

impl RunReport {
    fn up_to_date(platform: Platform) -> Self {
        Self {
            platform,
            summaries: Vec::new(),
            fast_path: true,
            halted: false,
        }
    }

    pub fn applied(&self) -> &[MigrationSummary] {
        &self.summaries
    }

    pub fn is_up_to_date(&self) -> bool {
        self.summaries.is_empty() && !self.halted
    }
}

/// Drives a single run. Borrowed configuration, no state between runs.
pub struct MigrationEngine<'a> {
    config: &'a MigrationConfig,
    factory: Option<&'a dyn MigrationFactory>,
    check_mode: bool,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(config: &'a MigrationConfig) -> Self {
        Self {
            config,
            factory: None,
            check_mode: false,
        }
    }

    pub fn with_factory(mut self, factory: Option<&'a dyn MigrationFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Report what would be applied, then roll back.
    pub fn check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn run(&self, conn: &mut dyn Connection, set: &MigrationSet) -> MigrationResult<RunReport> {
        self.config.validate()?;
        conn.set_autocommit(false)?;
        self.prepare_schema(conn)?;

        let platform = Platform::resolve(self.config, conn)?;
        let table = self.config.qualified_meta_table();
        let run_by = self.run_by(conn);
        log::debug!("Migrating {} with platform {platform}", conn.url());

        let created = self.ensure_table(conn, &platform, &table, &run_by)?;
        if self.config.fast_mode && !created && self.fast_check(conn, &platform, &table, set)? {
            log::info!("Migrations up to date (fast check on {table})");
            return Ok(RunReport::up_to_date(platform));
        }

        if let Err(e) = platform.acquire_lock(&table, conn, self.config.lock_max_attempts) {
            rollback_quietly(conn);
            return Err(e);
        }

        let applied = self
            .apply_locked(conn, platform, &table, &run_by, set)
            .and_then(|outcome| {
                if self.check_mode {
                    conn.rollback()?;
                } else {
                    conn.commit()?;
                }
                Ok(outcome)
            });
        if applied.is_err() {
            rollback_quietly(conn);
        }
        if let Err(e) = platform.release_lock(&table, conn) {
            log::warn!("Failed to release migration lock on {table}: {e}");
        }
        let outcome = applied?;

        run_deferred(conn, &outcome.deferred)?;

        if outcome.summaries.is_empty() {
            log::info!("Migrations up to date");
        } else if self.check_mode {
            log::info!("{} migration(s) pending", outcome.summaries.len());
        } else {
            log::info!("Applied {} migration(s)", outcome.summaries.len());
        }
        Ok(RunReport {
            platform,
            summaries: outcome.summaries,
            fast_path: false,
            halted: outcome.halted,
        })
    }

    fn run_by(&self, conn: &dyn Connection) -> String {
        self.config
            .db_username
            .clone()
            .or_else(|| conn.user().map(str::to_string))
            .unwrap_or_default()
    }

    fn schema(&self) -> Option<&str> {
        self.config
            .db_schema
            .as_deref()
            .filter(|schema| !schema.trim().is_empty())
    }

    fn prepare_schema(&self, conn: &mut dyn Connection) -> MigrationResult<()> {
        let Some(schema) = self.schema() else {
            return Ok(());
        };
        if self.config.create_schema_if_not_exists && !conn.schema_exists(schema)? {
            log::info!("Creating schema {schema}");
            let created = conn.create_schema(schema).and_then(|()| conn.commit());
            if let Err(e) = created {
                rollback_quietly(conn);
                if !conn.schema_exists(schema)? {
                    return Err(e.into());
                }
                log::debug!("Schema {schema} was created concurrently");
            }
        }
        if self.config.set_current_schema {
            conn.set_schema(schema)?;
        }
        Ok(())
    }

    /// Create and seed the history table when absent. Returns whether this
    /// call created it.
    ///
    /// Losing a creation race to another runner is not an error. A write
    /// conflict means the winner has not committed yet, so the check and
    /// create are retried until the table is visible.
    fn ensure_table(
        &self,
        conn: &mut dyn Connection,
        platform: &Platform,
        table: &str,
        run_by: &str,
    ) -> MigrationResult<bool> {
        let schema = self.schema();
        let max_attempts = self.config.lock_max_attempts;
        for n in 1..=max_attempts {
            if conn.table_exists(schema, &self.config.meta_table)? {
                if n > 1 {
                    log::info!("History table {table} was created by another runner");
                }
                return Ok(false);
            }
            if n == 1 {
                log::info!("Creating migration history table {table}");
            }
            let err = match create_table(conn, platform, table, run_by) {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };
            rollback_quietly(conn);
            if !err.is_conflict() {
                if conn.table_exists(schema, &self.config.meta_table)? {
                    log::info!("History table {table} was created by another runner");
                    return Ok(false);
                }
                log::error!("Failed to create history table {table}: {err}");
                return Err(err);
            }
            if n == max_attempts {
                log::error!(
                    "History table {table} still not visible after {max_attempts} attempts: {err}"
                );
                return Err(err);
            }
            log::debug!("Creating {table} conflicted with another runner (attempt {n}): {err}");
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
        Err(MigrationError::Config("lock_max_attempts must be at least 1".to_string()))
    }

    /// True when every local migration has a recorded row with the same
    /// checksum and nothing else is recorded.
    fn fast_check(
        &self,
        conn: &mut dyn Connection,
        platform: &Platform,
        table: &str,
        set: &MigrationSet,
    ) -> MigrationResult<bool> {
        let entries = platform.fast_read(table, conn)?;
        if entries.is_empty() && !set.init().is_empty() {
            log::debug!("Fast check: empty history, boot-init pending");
            return Ok(false);
        }
        if entries.len() != set.versions().len() {
            log::debug!(
                "Fast check: {} recorded, {} local",
                entries.len(),
                set.versions().len()
            );
            return Ok(false);
        }
        let recorded: HashMap<(VersionKind, String), i32> = entries
            .into_iter()
            .map(|entry| ((entry.kind, entry.key), entry.checksum))
            .collect();
        for resource in set.versions() {
            let checksum = local_checksum(self.config, self.factory, resource)?;
            let key = (resource.version().kind(), resource.key());
            if recorded.get(&key) != Some(&checksum) {
                log::debug!("Fast check: {} differs", resource.location());
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply_locked(
        &self,
        conn: &mut dyn Connection,
        platform: Platform,
        table: &str,
        run_by: &str,
        set: &MigrationSet,
    ) -> MigrationResult<ApplyOutcome> {
        let existing = platform.read_existing(table, conn)?;
        let mut history = HistoryTable::new(table, self.config, platform, existing)
            .with_factory(self.factory)
            .check_mode(self.check_mode)
            .run_by(run_by);
        match set.init().last() {
            Some(boot) if history.is_empty() => {
                log::info!("Empty history, starting from {}", boot.location());
                history.run_init(conn, boot, set.versions())?;
            }
            _ => history.run_all(conn, set.versions())?,
        }
        Ok(history.into_outcome())
    }
}

fn create_table(
    conn: &mut dyn Connection,
    platform: &Platform,
    table: &str,
    run_by: &str,
) -> MigrationResult<()> {
    conn.execute(&platform.create_table_sql(table), &[])?;
    let (sql, params) = platform.seed_sql(table, run_by);
    conn.execute(&sql, &params)?;
    conn.commit()?;
    Ok(())
}

/// Run held-back statements outside a transaction, then restore manual
/// commit mode whatever happened.
fn run_deferred(conn: &mut dyn Connection, deferred: &[DeferredScript]) -> MigrationResult<()> {
    if deferred.is_empty() {
        return Ok(());
    }
    conn.set_autocommit(true)?;
    let result = deferred.iter().try_for_each(|script| {
        log::info!(
            "Running {} non-transactional statement(s) from {}",
            script.statements.len(),
            script.location
        );
        script.run(conn).map(|_| ())
    });
    let reset = conn.set_autocommit(false);
    result?;
    reset?;
    Ok(())
}

fn rollback_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.rollback() {
        log::warn!("Rollback failed: {e}");
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
