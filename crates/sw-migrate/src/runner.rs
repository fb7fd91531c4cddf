//! Public entry point.

use crate::engine::{MigrationEngine, RunReport};
use crate::error::{MigrationError, MigrationResult};
use crate::history::MigrationSummary;
use crate::programmatic::MigrationFactory;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use sw_core::{MigrationConfig, MigrationSet};
use sw_db::{Connection, DuckDbConnection};

/// Applies a [`MigrationSet`] to a database according to a
/// [`MigrationConfig`].
///
/// The runner holds no connection state, so one runner can be shared by
/// several threads each bringing its own connection.
#[derive(Clone)]
pub struct MigrationRunner {
    config: MigrationConfig,
    factory: Option<Arc<dyn MigrationFactory>>,
}

impl MigrationRunner {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            factory: None,
        }
    }

    /// Runner configured from a YAML file.
    pub fn from_file(path: &Path) -> MigrationResult<Self> {
        Ok(Self::new(MigrationConfig::load(path)?))
    }

    /// Factory for programmatic migrations.
    pub fn with_factory(mut self, factory: Arc<dyn MigrationFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn engine(&self, check_mode: bool) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.config)
            .with_factory(self.factory.as_deref())
            .check_mode(check_mode)
    }

    /// Apply pending migrations on `conn`.
    pub fn run(&self, conn: &mut dyn Connection, set: &MigrationSet) -> MigrationResult<RunReport> {
        log::info!(
            "Running {} migration(s) against {}",
            set.versions().len(),
            conn.url()
        );
        self.engine(false).run(conn, set).map_err(|e| {
            log::error!("Migration run failed: {e}");
            e
        })
    }

    /// Migrations that a run would act on, without applying any of them.
    pub fn check_state(
        &self,
        conn: &mut dyn Connection,
        set: &MigrationSet,
    ) -> MigrationResult<Vec<MigrationSummary>> {
        Ok(self.engine(true).run(conn, set)?.summaries)
    }

    /// Open the configured `db_url` and run against it.
    pub fn run_configured(&self, set: &MigrationSet) -> MigrationResult<RunReport> {
        let mut conn = self.open_connection()?;
        self.run(&mut conn, set)
    }

    /// Connection for the configured `db_url`. Only DuckDB URLs
    /// (`duckdb:<path>`, `duckdb::memory:`, a bare path or `:memory:`) can be
    /// opened here; other databases are reached through [`Self::run`].
    pub fn open_connection(&self) -> MigrationResult<DuckDbConnection> {
        let url = self
            .config
            .db_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| MigrationError::Config("db_url is not set".to_string()))?;
        if url.contains("://") || url.starts_with("jdbc:") {
            return Err(MigrationError::Config(format!(
                "cannot open '{url}': only duckdb URLs are supported by run_configured"
            )));
        }
        let conn = DuckDbConnection::new(url)?;
        Ok(match &self.config.db_username {
            Some(user) => conn.with_user(user.as_str()),
            None => conn,
        })
    }
}

impl fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("config", &self.config)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}
