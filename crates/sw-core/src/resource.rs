//! Migration resource records handed to the runner by discovery.
//!
//! Discovery (classpath scanning, directory walking, index files) lives outside
//! this crate. It produces [`MigrationResource`] values: a parsed version, the
//! location the migration came from, its body, and optionally a checksum
//! precomputed from an index.

use crate::checksum;
use crate::error::{CoreError, CoreResult};
use crate::version::MigrationVersion;
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Loader for script content that is read on first use.
pub type ContentLoader = Arc<dyn Fn() -> Result<String, String> + Send + Sync>;

/// The executable part of a migration.
#[derive(Clone)]
pub enum ResourceBody {
    /// SQL script held in memory
    Sql(String),
    /// SQL script read through a loader when needed
    Lazy(ContentLoader),
    /// Code migration created by a factory from this id
    Programmatic { id: String },
}

impl fmt::Debug for ResourceBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceBody::Sql(content) => f.debug_tuple("Sql").field(&content.len()).finish(),
            ResourceBody::Lazy(_) => f.write_str("Lazy"),
            ResourceBody::Programmatic { id } => {
                f.debug_struct("Programmatic").field("id", id).finish()
            }
        }
    }
}

/// A single local migration.
#[derive(Debug, Clone)]
pub struct MigrationResource {
    version: MigrationVersion,
    location: String,
    body: ResourceBody,
    checksum: Option<i32>,
}

impl MigrationResource {
    pub fn new(version: MigrationVersion, location: impl Into<String>, body: ResourceBody) -> Self {
        Self {
            version,
            location: location.into(),
            body,
            checksum: None,
        }
    }

    /// In-memory SQL migration whose version is parsed from `version`.
    pub fn sql(
        version: &str,
        location: impl Into<String>,
        content: impl Into<String>,
    ) -> CoreResult<Self> {
        Ok(Self::new(
            MigrationVersion::parse(version)?,
            location,
            ResourceBody::Sql(content.into()),
        ))
    }

    /// SQL migration whose version is taken from the file name in `location`
    /// (e.g. `dbmigration/1.2__add_users.sql`).
    pub fn from_location(location: &str, body: ResourceBody) -> CoreResult<Self> {
        let name = Path::new(location)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::InvalidVersion {
                raw: location.to_string(),
                reason: "location has no file name".to_string(),
            })?;
        Ok(Self::new(MigrationVersion::parse(name)?, location, body))
    }

    /// Code migration created from `id` by the configured factory.
    pub fn programmatic(
        version: &str,
        location: impl Into<String>,
        id: impl Into<String>,
    ) -> CoreResult<Self> {
        Ok(Self::new(
            MigrationVersion::parse(version)?,
            location,
            ResourceBody::Programmatic { id: id.into() },
        ))
    }

    /// Attach a checksum precomputed by discovery (for example from an index
    /// file), so the content does not need to be read to compare it.
    pub fn with_checksum(mut self, checksum: i32) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn version(&self) -> &MigrationVersion {
        &self.version
    }

    pub fn key(&self) -> String {
        self.version.key()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn body(&self) -> &ResourceBody {
        &self.body
    }

    pub fn precomputed_checksum(&self) -> Option<i32> {
        self.checksum
    }

    pub fn programmatic_id(&self) -> Option<&str> {
        match &self.body {
            ResourceBody::Programmatic { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_programmatic(&self) -> bool {
        self.programmatic_id().is_some()
    }

    /// Raw script content (before placeholder substitution).
    ///
    /// Loader failures surface as [`CoreError::ResourceLoad`]; a programmatic
    /// migration has no script and also yields that error.
    pub fn content(&self) -> CoreResult<Cow<'_, str>> {
        match &self.body {
            ResourceBody::Sql(content) => Ok(Cow::Borrowed(content)),
            ResourceBody::Lazy(loader) => loader().map(Cow::Owned).map_err(|message| {
                CoreError::ResourceLoad {
                    location: self.location.clone(),
                    message,
                }
            }),
            ResourceBody::Programmatic { id } => Err(CoreError::ResourceLoad {
                location: self.location.clone(),
                message: format!("programmatic migration '{id}' has no script content"),
            }),
        }
    }

    /// Precomputed checksum, or the checksum of the raw content.
    pub fn checksum(&self) -> CoreResult<i32> {
        match self.checksum {
            Some(value) => Ok(value),
            None => Ok(checksum::calculate(&self.content()?)),
        }
    }
}

/// The ordered local migrations for one run: versioned/repeatable
/// migrations plus the optional boot-init scripts.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    versions: Vec<MigrationResource>,
    init: Vec<MigrationResource>,
}

impl MigrationSet {
    /// Build a set; resources are sorted into version order.
    pub fn new(mut versions: Vec<MigrationResource>) -> Self {
        versions.sort_by(|a, b| a.version().cmp(b.version()));
        Self {
            versions,
            init: Vec::new(),
        }
    }

    /// Attach boot-init scripts (used only against an empty history).
    pub fn with_init(mut self, mut init: Vec<MigrationResource>) -> Self {
        init.sort_by(|a, b| a.version().cmp(b.version()));
        self.init = init;
        self
    }

    pub fn versions(&self) -> &[MigrationResource] {
        &self.versions
    }

    pub fn init(&self) -> &[MigrationResource] {
        &self.init
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.init.is_empty()
    }
}

#[cfg(test)]
#[path = "resource_test.rs"]
mod tests;
