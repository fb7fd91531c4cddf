//! Migrations written as code.
//!
//! A resource with a programmatic body names a migration id. The runner asks
//! its [`MigrationFactory`] for an instance with that id, takes the checksum
//! from the instance, and calls [`ProgrammaticMigration::migrate`] inside the
//! migration transaction.

use crate::error::MigrationResult;
use crate::platform::Platform;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use sw_db::{Connection, DbResult, Row, SqlValue};

/// Connection and platform handed to a running programmatic migration.
pub struct MigrationContext<'a> {
    conn: &'a mut dyn Connection,
    platform: Platform,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a mut dyn Connection, platform: Platform) -> Self {
        Self { conn, platform }
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.conn.execute(sql, params)
    }

    pub fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.conn.query(sql, params)
    }
}

/// A migration implemented in Rust.
pub trait ProgrammaticMigration {
    /// Checksum recorded in history; change it to have a repeatable
    /// programmatic migration run again.
    fn checksum(&self) -> i32 {
        0
    }

    fn migrate(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;
}

/// Creates programmatic migrations by id.
pub trait MigrationFactory: Send + Sync {
    fn create(&self, id: &str) -> Option<Box<dyn ProgrammaticMigration>>;
}

type Constructor = Arc<dyn Fn() -> Box<dyn ProgrammaticMigration> + Send + Sync>;

/// A [`MigrationFactory`] backed by registered constructors.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    constructors: HashMap<String, Constructor>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, M>(mut self, id: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: ProgrammaticMigration + 'static,
    {
        self.constructors.insert(
            id.into(),
            Arc::new(move || Box::new(constructor()) as Box<dyn ProgrammaticMigration>),
        );
        self
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl MigrationFactory for MigrationRegistry {
    fn create(&self, id: &str) -> Option<Box<dyn ProgrammaticMigration>> {
        self.constructors.get(id).map(|constructor| constructor())
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.constructors.keys().collect();
        ids.sort();
        f.debug_struct("MigrationRegistry").field("ids", &ids).finish()
    }
}
