//! sw-migrate - Migration engine for Stepwise
//!
//! Applies ordered migrations to a database exactly once, recording each in a
//! history table guarded by a platform-specific lock. Repeatable migrations
//! re-run when their checksum changes; numbered ones fail on a changed
//! checksum unless patched.

pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod platform;
pub mod programmatic;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use engine::{MigrationEngine, RunReport};
pub use error::{ErrorKind, MigrationError, MigrationResult};
pub use history::{Action, MigrationSummary};
pub use platform::{LockStrategy, Platform, PlatformName};
pub use programmatic::{
    MigrationContext, MigrationFactory, MigrationRegistry, ProgrammaticMigration,
};
pub use runner::MigrationRunner;
