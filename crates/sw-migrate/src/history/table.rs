//! The history table state machine.
//!
//! [`decide`] maps a local migration and its recorded row to a [`Decision`];
//! [`HistoryTable`] applies decisions in version order, keeping the in-memory
//! row map, id allocation and derived versions in step with the database.

use crate::error::{MigrationError, MigrationResult};
use crate::executor::{DdlRunner, DeferredScript};
use crate::history::row::HistoryRow;
use crate::platform::{insert_sql, update_checksum_sql, update_sql, Platform};
use crate::programmatic::{MigrationContext, MigrationFactory, ProgrammaticMigration};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use sw_core::{compute_checksum, MigrationConfig, MigrationResource, MigrationVersion, VersionKind};
use sw_db::{Connection, SqlValue};

const ALLOW_ERROR_SAVEPOINT: &str = "sw_repeatable";

const DEFAULT_MIN_VERSION_MESSAGE: &str = "Database is below the minimum migration version";

/// What to do with one local migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Recorded checksum matches
    Skip,
    /// Record as applied without running
    PatchInsert,
    /// Replace the recorded checksum without running
    ResetChecksum,
    /// Run it; `rerun` replaces an existing row
    Execute { rerun: bool },
    /// Recorded checksum differs and nothing allows that
    Mismatch { recorded: i32 },
}

/// Whether the apply loop carries on after a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halt,
}

/// What happened (or, in check mode, would happen) to a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Executed,
    Rerun,
    /// Recorded without running (`skip_migration_run`)
    Recorded,
    PatchInserted,
    ChecksumReset,
    BootInit,
}

/// One migration acted on during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSummary {
    pub version: MigrationVersion,
    pub location: String,
    pub checksum: i32,
    pub action: Action,
    pub run_time_ms: i64,
}

impl MigrationSummary {
    pub fn key(&self) -> String {
        self.version.key()
    }
}

/// Result of an apply pass, handed back to the engine.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub summaries: Vec<MigrationSummary>,
    pub deferred: Vec<DeferredScript>,
    pub halted: bool,
}

/// Decide the outcome for a local migration with checksum `checksum`.
pub fn decide(
    existing: Option<&HistoryRow>,
    version: &MigrationVersion,
    checksum: i32,
    config: &MigrationConfig,
) -> Decision {
    let key = version.key();
    match existing {
        None if config.patch_insert_on.contains(&key) => Decision::PatchInsert,
        None => Decision::Execute { rerun: false },
        Some(row) if row.checksum() == checksum => Decision::Skip,
        Some(_) if config.patch_reset_checksum_on.contains(&key) => Decision::ResetChecksum,
        Some(_) if version.is_repeatable() || config.skip_checksum => {
            Decision::Execute { rerun: true }
        }
        Some(row) => Decision::Mismatch {
            recorded: row.checksum(),
        },
    }
}

/// A local migration with its checksum resolved.
struct Candidate<'r> {
    resource: &'r MigrationResource,
    checksum: i32,
    script: Option<String>,
    migration: Option<Box<dyn ProgrammaticMigration>>,
}

fn prepare<'r>(
    config: &MigrationConfig,
    factory: Option<&dyn MigrationFactory>,
    resource: &'r MigrationResource,
) -> MigrationResult<Candidate<'r>> {
    if let Some(id) = resource.programmatic_id() {
        let migration = factory.and_then(|f| f.create(id)).ok_or_else(|| {
            MigrationError::UnknownProgrammatic {
                id: id.to_string(),
                location: resource.location().to_string(),
            }
        })?;
        return Ok(Candidate {
            resource,
            checksum: resource
                .precomputed_checksum()
                .unwrap_or_else(|| migration.checksum()),
            script: None,
            migration: Some(migration),
        });
    }

    if let Some(checksum) = resource.precomputed_checksum() {
        return Ok(Candidate {
            resource,
            checksum,
            script: None,
            migration: None,
        });
    }

    let raw = resource.content()?;
    let script = config.placeholders.apply(&raw).into_owned();
    let checksum = if config.early_checksum_mode {
        compute_checksum(&raw)
    } else {
        compute_checksum(&script)
    };
    Ok(Candidate {
        resource,
        checksum,
        script: Some(script),
        migration: None,
    })
}

/// Checksum a local migration the way the apply loop will.
pub fn local_checksum(
    config: &MigrationConfig,
    factory: Option<&dyn MigrationFactory>,
    resource: &MigrationResource,
) -> MigrationResult<i32> {
    Ok(prepare(config, factory, resource)?.checksum)
}

/// In-memory view of the history table for one locked run.
pub struct HistoryTable<'a> {
    table: String,
    config: &'a MigrationConfig,
    platform: Platform,
    factory: Option<&'a dyn MigrationFactory>,
    check_mode: bool,
    run_by: String,
    rows: BTreeMap<String, HistoryRow>,
    last_id: i64,
    max_version: Option<MigrationVersion>,
    boot_init: Option<MigrationVersion>,
    planned: HashSet<String>,
    outcome: ApplyOutcome,
}

impl<'a> HistoryTable<'a> {
    pub fn new(
        table: impl Into<String>,
        config: &'a MigrationConfig,
        platform: Platform,
        existing: Vec<HistoryRow>,
    ) -> Self {
        let mut history = Self {
            table: table.into(),
            config,
            platform,
            factory: None,
            check_mode: false,
            run_by: String::new(),
            rows: BTreeMap::new(),
            last_id: 0,
            max_version: None,
            boot_init: None,
            planned: HashSet::new(),
            outcome: ApplyOutcome::default(),
        };
        for row in existing {
            history.track(row);
        }
        history
    }

    pub fn with_factory(mut self, factory: Option<&'a dyn MigrationFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Decide without executing or recording anything.
    pub fn check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn run_by(mut self, run_by: impl Into<String>) -> Self {
        self.run_by = run_by.into();
        self
    }

    /// No migration recorded yet (the reserved row does not count).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&HistoryRow> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &HistoryRow> {
        self.rows.values()
    }

    /// Highest recorded version or boot-init version.
    pub fn max_version(&self) -> Option<&MigrationVersion> {
        self.max_version.as_ref()
    }

    pub fn boot_init_version(&self) -> Option<&MigrationVersion> {
        self.boot_init.as_ref()
    }

    pub fn into_outcome(self) -> ApplyOutcome {
        self.outcome
    }

    fn track(&mut self, row: HistoryRow) {
        self.last_id = self.last_id.max(row.id());
        self.note_version(row.version());
        self.rows.insert(row.key(), row);
    }

    fn note_version(&mut self, version: &MigrationVersion) {
        match version.kind() {
            VersionKind::Version | VersionKind::BootInit => {
                if self.max_version.as_ref().map_or(true, |max| version > max) {
                    self.max_version = Some(version.clone());
                }
                if version.is_boot_init()
                    && self.boot_init.as_ref().map_or(true, |boot| version > boot)
                {
                    self.boot_init = Some(version.clone());
                }
            }
            VersionKind::Repeatable | VersionKind::Init => {}
        }
    }

    /// Fail when the database is below the configured minimum version.
    /// An empty history passes.
    pub fn check_min_version(&self) -> MigrationResult<()> {
        let Some(required) = self.config.min_version()? else {
            return Ok(());
        };
        if self.rows.is_empty() {
            return Ok(());
        }
        let below = match &self.max_version {
            Some(actual) => actual.segments() < required.segments(),
            None => true,
        };
        if !below {
            return Ok(());
        }
        let actual = self
            .max_version
            .as_ref()
            .map_or_else(|| "none".to_string(), MigrationVersion::normalised);
        let message = self
            .config
            .min_version_fail_message
            .clone()
            .unwrap_or_else(|| DEFAULT_MIN_VERSION_MESSAGE.to_string());
        log::error!("{message}: database at {actual}, required {}", required.normalised());
        Err(MigrationError::MinVersion {
            message,
            actual,
            required: required.normalised(),
        })
    }

    /// Apply `migrations` (in version order) against the recorded history.
    pub fn run_all(
        &mut self,
        conn: &mut dyn Connection,
        migrations: &[MigrationResource],
    ) -> MigrationResult<()> {
        self.check_min_version()?;
        self.apply_in_order(conn, migrations)
    }

    /// First run against an empty history with boot-init scripts: run the
    /// repeatable-init migrations, record `boot` as the baseline, then apply
    /// everything newer than it.
    pub fn run_init(
        &mut self,
        conn: &mut dyn Connection,
        boot: &MigrationResource,
        migrations: &[MigrationResource],
    ) -> MigrationResult<()> {
        self.check_min_version()?;
        let (init, rest): (Vec<MigrationResource>, Vec<MigrationResource>) = migrations
            .iter()
            .cloned()
            .partition(|m| m.version().is_repeatable_init());
        self.apply_in_order(conn, &init)?;
        if self.outcome.halted {
            return Ok(());
        }
        self.apply_boot_init(conn, boot)?;
        self.apply_in_order(conn, &rest)
    }

    fn apply_in_order(
        &mut self,
        conn: &mut dyn Connection,
        migrations: &[MigrationResource],
    ) -> MigrationResult<()> {
        let mut prior: Option<&MigrationResource> = None;
        for resource in migrations {
            let version = resource.version();
            if self.covered_by_boot_init(version) {
                log::debug!(
                    "Skipping {} (covered by boot-init {})",
                    resource.location(),
                    self.boot_init
                        .as_ref()
                        .map(MigrationVersion::normalised)
                        .unwrap_or_default()
                );
                prior = Some(resource);
                continue;
            }
            match self.apply(conn, resource, prior)? {
                Step::Continue => {}
                Step::Halt => {
                    self.outcome.halted = true;
                    break;
                }
            }
            if !version.is_repeatable() {
                prior = Some(resource);
            }
        }
        Ok(())
    }

    fn covered_by_boot_init(&self, version: &MigrationVersion) -> bool {
        version.kind() == VersionKind::Version
            && self
                .boot_init
                .as_ref()
                .is_some_and(|boot| version.segments() <= boot.segments())
    }

    /// Prior migration is recorded, was handled in this run, or is covered
    /// by boot-init.
    fn is_present(&self, resource: &MigrationResource) -> bool {
        let key = resource.key();
        self.rows.contains_key(&key)
            || self.planned.contains(&key)
            || self.covered_by_boot_init(resource.version())
    }

    /// Decide and act on one migration.
    pub fn apply(
        &mut self,
        conn: &mut dyn Connection,
        resource: &MigrationResource,
        prior: Option<&MigrationResource>,
    ) -> MigrationResult<Step> {
        let version = resource.version();
        if !version.is_repeatable() {
            if let Some(prior) = prior {
                if !self.is_present(prior) {
                    log::error!(
                        "Migration {} requires {} which has not been applied; stopping",
                        resource.location(),
                        prior.location()
                    );
                    return Ok(Step::Halt);
                }
            }
        }

        let key = resource.key();
        let mut candidate = prepare(self.config, self.factory, resource)?;
        let decision = decide(self.rows.get(&key), version, candidate.checksum, self.config);
        match decision {
            Decision::Skip => {
                log::debug!("Migration {} already applied", resource.location());
            }
            Decision::Mismatch { recorded } => {
                log::error!(
                    "Checksum of {} changed (recorded {}, local {})",
                    resource.location(),
                    recorded,
                    candidate.checksum
                );
                return Err(MigrationError::ChecksumMismatch {
                    key,
                    location: resource.location().to_string(),
                    recorded,
                    local: candidate.checksum,
                });
            }
            Decision::ResetChecksum => {
                if !self.check_mode {
                    self.reset_checksum(conn, &key, candidate.checksum)?;
                    log::info!("Reset checksum of {}", resource.location());
                }
                self.summarise(resource, candidate.checksum, Action::ChecksumReset, 0);
            }
            Decision::PatchInsert => {
                if self.check_mode {
                    self.summarise(resource, candidate.checksum, Action::PatchInserted, 0);
                } else {
                    self.insert_row(conn, version.clone(), candidate.checksum, 0)?;
                    log::info!("Patch inserted {} without running it", resource.location());
                    self.summarise(resource, candidate.checksum, Action::PatchInserted, 0);
                }
                self.planned.insert(key);
            }
            Decision::Execute { rerun } => {
                self.execute(conn, &key, &mut candidate, rerun)?;
            }
        }
        Ok(Step::Continue)
    }

    fn execute(
        &mut self,
        conn: &mut dyn Connection,
        key: &str,
        candidate: &mut Candidate<'_>,
        rerun: bool,
    ) -> MigrationResult<()> {
        let resource = candidate.resource;
        let checksum = candidate.checksum;
        let action = if self.config.skip_migration_run {
            Action::Recorded
        } else if rerun {
            Action::Rerun
        } else {
            Action::Executed
        };

        if self.check_mode {
            self.summarise(resource, checksum, action, 0);
            self.planned.insert(key.to_string());
            return Ok(());
        }

        let started = Instant::now();
        if !self.config.skip_migration_run {
            let allow_error = resource.version().is_repeatable_last()
                && self.config.allow_error_in_repeatable;
            let deferred = if allow_error {
                match self.run_guarded(conn, candidate)? {
                    Some(deferred) => deferred,
                    None => return Ok(()),
                }
            } else {
                self.run_candidate(conn, candidate)?
            };
            if !deferred.is_empty() {
                self.outcome.deferred.push(DeferredScript {
                    location: resource.location().to_string(),
                    statements: deferred,
                    allow_error,
                });
            }
        }
        let run_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        if rerun {
            self.rerun_row(conn, key, checksum, run_time_ms)?;
            log::info!("Re-ran {} ({} ms)", resource.location(), run_time_ms);
        } else {
            self.insert_row(conn, resource.version().clone(), checksum, run_time_ms)?;
            match action {
                Action::Recorded => log::info!("Recorded {} without running it", resource.location()),
                _ => log::info!("Applied {} ({} ms)", resource.location(), run_time_ms),
            }
        }
        self.summarise(resource, checksum, action, run_time_ms);
        self.planned.insert(key.to_string());
        Ok(())
    }

    /// Run a repeatable whose failure is tolerated. `None` means it failed
    /// and was rolled back to the savepoint (when the connection has them).
    fn run_guarded(
        &mut self,
        conn: &mut dyn Connection,
        candidate: &mut Candidate<'_>,
    ) -> MigrationResult<Option<Vec<String>>> {
        let savepoint = conn.supports_savepoints();
        if savepoint {
            conn.savepoint(ALLOW_ERROR_SAVEPOINT)?;
        }
        match self.run_candidate(conn, candidate) {
            Ok(deferred) => {
                if savepoint {
                    conn.release_savepoint(ALLOW_ERROR_SAVEPOINT)?;
                }
                Ok(Some(deferred))
            }
            Err(e) => {
                if savepoint {
                    conn.rollback_to_savepoint(ALLOW_ERROR_SAVEPOINT)?;
                }
                log::warn!(
                    "Ignoring failure of repeatable migration {}: {}",
                    candidate.resource.location(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Run the migration body, returning its non-transactional statements.
    fn run_candidate(
        &self,
        conn: &mut dyn Connection,
        candidate: &mut Candidate<'_>,
    ) -> MigrationResult<Vec<String>> {
        let resource = candidate.resource;
        if let Some(migration) = &candidate.migration {
            let mut ctx = MigrationContext::new(conn, self.platform);
            migration
                .migrate(&mut ctx)
                .map_err(|e| MigrationError::Programmatic {
                    location: resource.location().to_string(),
                    message: e.to_string(),
                })?;
            return Ok(Vec::new());
        }

        let script = match candidate.script.take() {
            Some(script) => script,
            None => self.config.placeholders.apply(&resource.content()?).into_owned(),
        };
        let platform = self.platform;
        let split = sw_sql::split_classified(&script, |stmt| platform.transactional(stmt));
        DdlRunner::new(resource.location()).run_all(conn, &split.transactional)?;
        Ok(split.non_transactional)
    }

    fn apply_boot_init(
        &mut self,
        conn: &mut dyn Connection,
        boot: &MigrationResource,
    ) -> MigrationResult<()> {
        let version = boot.version().as_boot_init();
        let mut candidate = prepare(self.config, self.factory, boot)?;
        if self.check_mode {
            self.summarise(boot, candidate.checksum, Action::BootInit, 0);
            self.note_version(&version);
            return Ok(());
        }

        let started = Instant::now();
        if !self.config.skip_migration_run {
            let deferred = self.run_candidate(conn, &mut candidate)?;
            if !deferred.is_empty() {
                self.outcome.deferred.push(DeferredScript {
                    location: boot.location().to_string(),
                    statements: deferred,
                    allow_error: false,
                });
            }
        }
        let run_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.insert_row(conn, version.clone(), candidate.checksum, run_time_ms)?;
        log::info!(
            "Applied boot-init {} as version {} ({} ms)",
            boot.location(),
            version.normalised(),
            run_time_ms
        );
        self.outcome.summaries.push(MigrationSummary {
            version,
            location: boot.location().to_string(),
            checksum: candidate.checksum,
            action: Action::BootInit,
            run_time_ms,
        });
        Ok(())
    }

    fn insert_row(
        &mut self,
        conn: &mut dyn Connection,
        version: MigrationVersion,
        checksum: i32,
        run_time_ms: i64,
    ) -> MigrationResult<()> {
        let row = HistoryRow::new(self.last_id + 1, version, checksum, &self.run_by, run_time_ms);
        conn.execute(&insert_sql(&self.table), &row.insert_params())?;
        self.track(row);
        Ok(())
    }

    fn rerun_row(
        &mut self,
        conn: &mut dyn Connection,
        key: &str,
        checksum: i32,
        run_time_ms: i64,
    ) -> MigrationResult<()> {
        let Some(existing) = self.rows.get(key) else {
            return Err(MigrationError::InvalidHistory {
                id: -1,
                message: format!("no recorded row for '{key}'"),
            });
        };
        let row = existing.rerun(checksum, &self.run_by, run_time_ms);
        conn.execute(
            &update_sql(&self.table),
            &[
                SqlValue::Int(i64::from(row.checksum())),
                SqlValue::from(row.run_on()),
                SqlValue::Text(row.run_by().to_string()),
                SqlValue::Int(row.run_time_ms()),
                SqlValue::Int(row.id()),
            ],
        )?;
        self.rows.insert(key.to_string(), row);
        Ok(())
    }

    fn reset_checksum(
        &mut self,
        conn: &mut dyn Connection,
        key: &str,
        checksum: i32,
    ) -> MigrationResult<()> {
        let Some(existing) = self.rows.get(key) else {
            return Err(MigrationError::InvalidHistory {
                id: -1,
                message: format!("no recorded row for '{key}'"),
            });
        };
        let row = existing.with_checksum(checksum);
        conn.execute(
            &update_checksum_sql(&self.table),
            &[SqlValue::Int(i64::from(checksum)), SqlValue::Int(row.id())],
        )?;
        self.rows.insert(key.to_string(), row);
        Ok(())
    }

    fn summarise(
        &mut self,
        resource: &MigrationResource,
        checksum: i32,
        action: Action,
        run_time_ms: i64,
    ) {
        self.outcome.summaries.push(MigrationSummary {
            version: resource.version().clone(),
            location: resource.location().to_string(),
            checksum,
            action,
            run_time_ms,
        });
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod tests;
