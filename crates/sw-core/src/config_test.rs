use super::*;
use std::io::Write;

#[test]
fn test_defaults() {
    let config = MigrationConfig::default();
    assert_eq!(config.meta_table, "db_migration");
    assert!(config.create_schema_if_not_exists);
    assert!(config.set_current_schema);
    assert!(!config.skip_checksum);
    assert!(config.patch_insert_on.is_empty());
    assert_eq!(config.lock_max_attempts, DEFAULT_LOCK_MAX_ATTEMPTS);
    assert_eq!(config.qualified_meta_table(), "db_migration");
}

#[test]
fn test_parse_empty_yaml_uses_defaults() {
    let config = MigrationConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config.meta_table, "db_migration");
    assert!(config.placeholders.is_empty());
}

#[test]
fn test_parse_full_config() {
    let yaml = r#"
meta_table: app_migrations
db_schema: app
create_schema_if_not_exists: false
skip_checksum: true
allow_error_in_repeatable: true
patch_insert_on: "1.1, V1_2__thing"
patch_reset_checksum_on:
  - R__views
min_version: "2.0"
min_version_fail_message: "upgrade to 2.x first"
platform: postgres
fast_mode: true
placeholders: "schema=app,role=reader"
db_url: "duckdb::memory:"
lock_max_attempts: 10
"#;
    let config = MigrationConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.qualified_meta_table(), "app.app_migrations");
    assert!(!config.create_schema_if_not_exists);
    assert!(config.skip_checksum);
    assert!(config.allow_error_in_repeatable);
    assert!(config.patch_insert_on.contains("1.1"));
    assert!(config.patch_insert_on.contains("1.2"));
    assert!(!config.patch_insert_on.contains("1.3"));
    assert!(config.patch_reset_checksum_on.contains("views"));
    assert_eq!(config.min_version().unwrap().unwrap().normalised(), "2.0");
    assert_eq!(config.platform.as_deref(), Some("postgres"));
    assert!(config.fast_mode);
    assert_eq!(config.placeholders.get("role"), Some("reader"));
    assert_eq!(config.lock_max_attempts, 10);
}

#[test]
fn test_placeholders_as_map() {
    let yaml = r#"
placeholders:
  schema: app
  owner: admin
"#;
    let config = MigrationConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.placeholders.get("owner"), Some("admin"));
}

#[test]
fn test_reset_checksum_wildcard() {
    let config = MigrationConfig::from_yaml_str("patch_reset_checksum_on: \"*\"").unwrap();
    assert_eq!(config.patch_reset_checksum_on, KeySet::All);
    assert!(config.patch_reset_checksum_on.contains("anything"));
}

#[test]
fn test_unknown_field_rejected() {
    let err = MigrationConfig::from_yaml_str("not_a_field: 1").unwrap_err();
    assert!(matches!(err, CoreError::ConfigParseError { .. }));
}

#[test]
fn test_invalid_min_version_rejected() {
    let err = MigrationConfig::from_yaml_str("min_version: \"abc\"").unwrap_err();
    assert!(matches!(err, CoreError::ConfigInvalid { .. }));

    let err = MigrationConfig::from_yaml_str("min_version: \"R__x\"").unwrap_err();
    assert!(matches!(err, CoreError::ConfigInvalid { .. }));
}

#[test]
fn test_zero_lock_attempts_rejected() {
    let err = MigrationConfig::from_yaml_str("lock_max_attempts: 0").unwrap_err();
    assert!(matches!(err, CoreError::ConfigInvalid { .. }));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("migration.yml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "meta_table: from_file").unwrap();
    let config = MigrationConfig::load(&path).unwrap();
    assert_eq!(config.meta_table, "from_file");
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = MigrationConfig::load(&dir.path().join("missing.yml")).unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound { .. }));
}

#[test]
fn test_key_set_builders() {
    let config = MigrationConfig::default()
        .with_patch_insert_on("1.3,1.4")
        .with_patch_reset_checksum_on("*");
    assert!(config.patch_insert_on.contains("1.4"));
    assert_eq!(config.patch_reset_checksum_on, KeySet::All);
    assert_eq!(KeySet::parse(" , "), KeySet::None);
}
