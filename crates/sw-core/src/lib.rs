//! sw-core - Core library for Stepwise
//!
//! This crate provides the version model, content checksums, placeholder
//! substitution, migration resource records and the runner configuration
//! shared by the other Stepwise crates.

pub mod checksum;
pub mod config;
pub mod error;
pub mod placeholder;
pub mod resource;
pub(crate) mod serde_helpers;
pub mod version;

pub use checksum::calculate as compute_checksum;
pub use config::{KeySet, MigrationConfig};
pub use error::{CoreError, CoreResult};
pub use placeholder::Placeholders;
pub use resource::{MigrationResource, MigrationSet, ResourceBody};
pub use version::{MigrationVersion, VersionKind};
