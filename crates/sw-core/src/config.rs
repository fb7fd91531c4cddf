//! Runner configuration, loadable from YAML.

use crate::error::{CoreError, CoreResult};
use crate::placeholder::Placeholders;
use crate::serde_helpers::{default_true, split_list, StringOrList, StringOrMap};
use crate::version::MigrationVersion;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::path::Path;

/// Default name of the migration history table.
pub const DEFAULT_META_TABLE: &str = "db_migration";

/// Default number of lock attempts before giving up (100 ms apart).
pub const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 3000;

/// A set of migration keys, or every key (`*`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySet {
    /// Matches every migration
    All,
    /// Matches nothing
    #[default]
    None,
    /// Matches the listed keys only
    Keys(BTreeSet<String>),
}

impl KeySet {
    /// Build from user-supplied items. Items are normalised to migration keys
    /// so `V1_1`, `1.1` and `1.1__name` all match version `1.1`.
    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = BTreeSet::new();
        for item in items {
            let item = item.as_ref().trim();
            if item == "*" {
                return KeySet::All;
            }
            if item.is_empty() {
                continue;
            }
            let key = match MigrationVersion::parse(item) {
                Ok(version) => version.key(),
                Err(_) => item.to_lowercase(),
            };
            keys.insert(key);
        }
        if keys.is_empty() {
            KeySet::None
        } else {
            KeySet::Keys(keys)
        }
    }

    /// Parse a comma-separated list (or `*`).
    pub fn parse(text: &str) -> Self {
        Self::from_items(split_list(text))
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            KeySet::All => true,
            KeySet::None => false,
            KeySet::Keys(keys) => keys.contains(key),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, KeySet::None)
    }
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(KeySet::from_items(StringOrList::deserialize(deserializer)?.into_items()))
    }
}

fn deserialize_placeholders<'de, D>(deserializer: D) -> Result<Placeholders, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrMap::deserialize(deserializer)? {
        StringOrMap::Text(text) => Placeholders::parse(&text),
        StringOrMap::Map(map) => Placeholders::from_map(map),
    })
}

/// Migration runner configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MigrationConfig {
    /// Name of the history table
    pub meta_table: String,

    /// Location of versioned migrations (used by discovery)
    pub migration_path: String,

    /// Location of boot-init scripts (used by discovery)
    pub migration_init_path: Option<String>,

    /// Schema holding the history table and migrated objects
    pub db_schema: Option<String>,

    /// Create `db_schema` when it does not exist
    #[serde(default = "default_true")]
    pub create_schema_if_not_exists: bool,

    /// Make `db_schema` the connection's current schema
    #[serde(default = "default_true")]
    pub set_current_schema: bool,

    /// Re-run migrations whose checksum changed instead of failing
    pub skip_checksum: bool,

    /// Record migrations without executing them (adopt a migrated database)
    pub skip_migration_run: bool,

    /// Log and continue when a repeatable migration fails
    pub allow_error_in_repeatable: bool,

    /// Keys to record as applied without running them
    pub patch_insert_on: KeySet,

    /// Keys whose stored checksum is replaced instead of failing
    pub patch_reset_checksum_on: KeySet,

    /// Lowest version the database must already be at
    pub min_version: Option<String>,

    /// Message reported when `min_version` is not met
    pub min_version_fail_message: Option<String>,

    /// Platform override (skips product-name detection)
    pub platform: Option<String>,

    /// Platform used for DDL/type decisions when `platform` is a lock variant
    pub base_platform: Option<String>,

    /// Skip locking and applying when history checksums already match
    pub fast_mode: bool,

    /// Checksum raw content before placeholder substitution
    pub early_checksum_mode: bool,

    /// Values substituted for `${key}` tokens
    #[serde(deserialize_with = "deserialize_placeholders")]
    pub placeholders: Placeholders,

    /// Connection URL used by `run_configured`
    pub db_url: Option<String>,

    /// Recorded as `run_by` (falls back to the connection user)
    pub db_username: Option<String>,

    /// Lock attempts before giving up
    pub lock_max_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            meta_table: DEFAULT_META_TABLE.to_string(),
            migration_path: "dbmigration".to_string(),
            migration_init_path: None,
            db_schema: None,
            create_schema_if_not_exists: true,
            set_current_schema: true,
            skip_checksum: false,
            skip_migration_run: false,
            allow_error_in_repeatable: false,
            patch_insert_on: KeySet::None,
            patch_reset_checksum_on: KeySet::None,
            min_version: None,
            min_version_fail_message: None,
            platform: None,
            base_platform: None,
            fast_mode: false,
            early_checksum_mode: false,
            placeholders: Placeholders::new(),
            db_url: None,
            db_username: None,
            lock_max_attempts: DEFAULT_LOCK_MAX_ATTEMPTS,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> CoreResult<Self> {
        let config: MigrationConfig =
            serde_yaml::from_str(yaml).map_err(|e| CoreError::ConfigParseError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot validate on its own.
    pub fn validate(&self) -> CoreResult<()> {
        if self.meta_table.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "meta_table must not be empty".to_string(),
            });
        }
        if self.lock_max_attempts == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "lock_max_attempts must be at least 1".to_string(),
            });
        }
        self.min_version()?;
        Ok(())
    }

    /// Parsed `min_version`, if configured.
    pub fn min_version(&self) -> CoreResult<Option<MigrationVersion>> {
        match &self.min_version {
            None => Ok(None),
            Some(raw) => {
                let version = MigrationVersion::parse(raw).map_err(|e| CoreError::ConfigInvalid {
                    message: format!("min_version: {e}"),
                })?;
                if version.is_repeatable() || version.segments().is_empty() {
                    return Err(CoreError::ConfigInvalid {
                        message: format!("min_version '{raw}' must be a numbered version"),
                    });
                }
                Ok(Some(version))
            }
        }
    }

    /// History table name qualified with `db_schema` when one is set.
    pub fn qualified_meta_table(&self) -> String {
        match &self.db_schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.meta_table),
            _ => self.meta_table.clone(),
        }
    }

    /// Set the patch-insert keys from a comma-separated list.
    pub fn with_patch_insert_on(mut self, keys: &str) -> Self {
        self.patch_insert_on = KeySet::parse(keys);
        self
    }

    /// Set the patch-reset-checksum keys from a comma-separated list or `*`.
    pub fn with_patch_reset_checksum_on(mut self, keys: &str) -> Self {
        self.patch_reset_checksum_on = KeySet::parse(keys);
        self
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
