use super::*;
use crate::error::ErrorKind;
use crate::platform::PlatformName;
use crate::programmatic::MigrationRegistry;
use crate::test_utils::ScriptedConnection;

const TABLE: &str = "db_migration";

fn version(raw: &str) -> MigrationVersion {
    MigrationVersion::parse(raw).unwrap()
}

fn sql(raw: &str, content: &str) -> MigrationResource {
    MigrationResource::sql(raw, format!("dbmigration/{raw}.sql"), content).unwrap()
}

fn recorded(id: i64, raw: &str, content: &str) -> HistoryRow {
    HistoryRow::new(id, version(raw), compute_checksum(content), "tester", 5)
}

fn generic() -> Platform {
    Platform::for_name(PlatformName::Generic)
}

fn actions(outcome: &ApplyOutcome) -> Vec<(String, Action)> {
    outcome
        .summaries
        .iter()
        .map(|s| (s.key(), s.action))
        .collect()
}

// ===== decide =====

#[test]
fn test_decide_new_migration_executes() {
    let config = MigrationConfig::default();
    assert_eq!(
        decide(None, &version("1.0__a"), 10, &config),
        Decision::Execute { rerun: false }
    );
}

#[test]
fn test_decide_matching_checksum_skips() {
    let config = MigrationConfig::default();
    let row = HistoryRow::new(1, version("1.0__a"), 10, "t", 0);
    assert_eq!(decide(Some(&row), &version("1.0__a"), 10, &config), Decision::Skip);
}

#[test]
fn test_decide_changed_version_is_mismatch() {
    let config = MigrationConfig::default();
    let row = HistoryRow::new(1, version("1.0__a"), 10, "t", 0);
    assert_eq!(
        decide(Some(&row), &version("1.0__a"), 11, &config),
        Decision::Mismatch { recorded: 10 }
    );
}

#[test]
fn test_decide_changed_repeatable_reruns() {
    let config = MigrationConfig::default();
    let row = HistoryRow::new(3, version("R__views"), 10, "t", 0);
    assert_eq!(
        decide(Some(&row), &version("R__views"), 11, &config),
        Decision::Execute { rerun: true }
    );
}

#[test]
fn test_decide_skip_checksum_reruns_versions() {
    let config = MigrationConfig {
        skip_checksum: true,
        ..MigrationConfig::default()
    };
    let row = HistoryRow::new(1, version("1.0__a"), 10, "t", 0);
    assert_eq!(
        decide(Some(&row), &version("1.0__a"), 11, &config),
        Decision::Execute { rerun: true }
    );
}

#[test]
fn test_decide_patch_sets() {
    let config = MigrationConfig::default()
        .with_patch_insert_on("1.0")
        .with_patch_reset_checksum_on("1.1");
    assert_eq!(decide(None, &version("1.0__a"), 10, &config), Decision::PatchInsert);

    let row = HistoryRow::new(2, version("1.1__b"), 10, "t", 0);
    assert_eq!(
        decide(Some(&row), &version("1.1__b"), 11, &config),
        Decision::ResetChecksum
    );
    // patch insert only applies to missing rows
    let row = HistoryRow::new(1, version("1.0__a"), 10, "t", 0);
    assert_eq!(
        decide(Some(&row), &version("1.0__a"), 11, &config),
        Decision::Mismatch { recorded: 10 }
    );
}

// ===== HistoryTable =====

#[test]
fn test_new_derives_state() {
    let config = MigrationConfig::default();
    let boot = HistoryRow::new(1, version("1.3").as_boot_init(), 0, "t", 0);
    let rows = vec![
        boot,
        recorded(2, "1.4__d", "d;"),
        recorded(3, "R__views", "v;"),
    ];
    let history = HistoryTable::new(TABLE, &config, generic(), rows);
    assert!(!history.is_empty());
    assert_eq!(history.max_version().unwrap().normalised(), "1.4");
    assert_eq!(history.boot_init_version().unwrap().normalised(), "1.3");
    assert!(history.get("views").is_some());
}

#[test]
fn test_run_all_applies_new_migrations_in_order() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let migrations = vec![
        sql("1.0__a", "create table a (id int);"),
        sql("1.1__b", "create table b (id int);\ninsert into b values (1);"),
    ];
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new()).run_by("deploy");
    history.run_all(&mut conn, &migrations).unwrap();

    assert_eq!(history.get("1.0").unwrap().id(), 1);
    assert_eq!(history.get("1.1").unwrap().id(), 2);
    assert_eq!(history.get("1.1").unwrap().run_by(), "deploy");
    assert_eq!(
        conn.statements()
            .into_iter()
            .filter(|s| !s.starts_with("insert into db_migration"))
            .collect::<Vec<_>>(),
        vec![
            "create table a (id int);",
            "create table b (id int);",
            "insert into b values (1);"
        ]
    );
    let inserts: Vec<_> = conn
        .calls()
        .iter()
        .filter(|c| c.sql.starts_with("insert into db_migration"))
        .collect();
    assert_eq!(inserts.len(), 2);
    assert_eq!(inserts[0].params[0], SqlValue::Int(1));
    assert_eq!(inserts[0].params[1], SqlValue::Text("V".to_string()));
    assert_eq!(inserts[0].params[3], SqlValue::Text("1.0".to_string()));
    assert_eq!(inserts[0].params[4], SqlValue::Text("a".to_string()));

    let outcome = history.into_outcome();
    assert_eq!(
        actions(&outcome),
        vec![
            ("1.0".to_string(), Action::Executed),
            ("1.1".to_string(), Action::Executed)
        ]
    );
}

#[test]
fn test_ids_continue_after_existing_rows() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(7, "1.0__a", "a;")];
    let migrations = vec![sql("1.0__a", "a;"), sql("1.1__b", "b;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    history.run_all(&mut conn, &migrations).unwrap();
    assert_eq!(history.get("1.1").unwrap().id(), 8);
    assert_eq!(conn.count("a;"), 0);
}

#[test]
fn test_unchanged_history_runs_nothing() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;"), recorded(2, "R__views", "v;")];
    let migrations = vec![sql("1.0__a", "a;"), sql("R__views", "v;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    history.run_all(&mut conn, &migrations).unwrap();
    assert!(conn.calls().is_empty());
    assert!(history.into_outcome().summaries.is_empty());
}

#[test]
fn test_checksum_mismatch_fails() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;")];
    let migrations = vec![sql("1.0__a", "a changed;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    let err = history.run_all(&mut conn, &migrations).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(matches!(err, MigrationError::ChecksumMismatch { ref key, .. } if key == "1.0"));
}

#[test]
fn test_changed_repeatable_is_rerun() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;"), recorded(2, "R__views", "v1;")];
    let migrations = vec![sql("1.0__a", "a;"), sql("R__views", "v2;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    history.run_all(&mut conn, &migrations).unwrap();

    assert_eq!(conn.count("v2;"), 1);
    assert_eq!(conn.count("update db_migration set mchecksum = ?, run_on"), 1);
    let row = history.get("views").unwrap();
    assert_eq!(row.id(), 2);
    assert_eq!(row.checksum(), compute_checksum("v2;"));
    assert_eq!(
        actions(&history.into_outcome()),
        vec![("views".to_string(), Action::Rerun)]
    );
}

#[test]
fn test_patch_insert_records_without_running() {
    let config = MigrationConfig::default().with_patch_insert_on("1.1");
    let mut conn = ScriptedConnection::new("H2");
    let migrations = vec![sql("1.0__a", "a;"), sql("1.1__b", "b;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history.run_all(&mut conn, &migrations).unwrap();

    assert_eq!(conn.count("b;"), 0);
    assert_eq!(history.get("1.1").unwrap().checksum(), compute_checksum("b;"));
    assert_eq!(
        actions(&history.into_outcome()),
        vec![
            ("1.0".to_string(), Action::Executed),
            ("1.1".to_string(), Action::PatchInserted)
        ]
    );
}

#[test]
fn test_reset_checksum_updates_only_checksum() {
    let config = MigrationConfig::default().with_patch_reset_checksum_on("*");
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;")];
    let migrations = vec![sql("1.0__a", "a reformatted;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    history.run_all(&mut conn, &migrations).unwrap();

    assert_eq!(
        conn.statements(),
        vec!["update db_migration set mchecksum = ? where id = ?"]
    );
    assert_eq!(
        history.get("1.0").unwrap().checksum(),
        compute_checksum("a reformatted;")
    );
}

#[test]
fn test_min_version_gate() {
    let config = MigrationConfig {
        min_version: Some("2.0".to_string()),
        min_version_fail_message: Some("Upgrade to 2.x first".to_string()),
        ..MigrationConfig::default()
    };
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    let err = history.run_all(&mut conn, &[sql("3.0__c", "c;")]).unwrap_err();
    match err {
        MigrationError::MinVersion {
            message,
            actual,
            required,
        } => {
            assert_eq!(message, "Upgrade to 2.x first");
            assert_eq!(actual, "1.0");
            assert_eq!(required, "2.0");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(conn.calls().is_empty());

    // an empty history passes the gate
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history.run_all(&mut conn, &[sql("3.0__c", "c;")]).unwrap();
    assert_eq!(conn.count("c;"), 1);
}

#[test]
fn test_check_mode_executes_nothing() {
    let config = MigrationConfig::default().with_patch_insert_on("1.2");
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;")];
    let migrations = vec![sql("1.0__a", "a;"), sql("1.1__b", "b;"), sql("1.2__c", "c;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing).check_mode(true);
    history.run_all(&mut conn, &migrations).unwrap();

    assert!(conn.calls().is_empty());
    assert_eq!(
        actions(&history.into_outcome()),
        vec![
            ("1.1".to_string(), Action::Executed),
            ("1.2".to_string(), Action::PatchInserted)
        ]
    );
}

#[test]
fn test_check_mode_reports_pending_checksum_reset() {
    let config = MigrationConfig::default().with_patch_reset_checksum_on("1.0");
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![recorded(1, "1.0__a", "a;")];
    let migrations = vec![sql("1.0__a", "a reformatted;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing).check_mode(true);
    history.run_all(&mut conn, &migrations).unwrap();

    assert!(conn.calls().is_empty());
    assert_eq!(history.get("1.0").unwrap().checksum(), compute_checksum("a;"));
    assert_eq!(
        actions(&history.into_outcome()),
        vec![("1.0".to_string(), Action::ChecksumReset)]
    );
}

#[test]
fn test_skip_migration_run_records_only() {
    let config = MigrationConfig {
        skip_migration_run: true,
        ..MigrationConfig::default()
    };
    let mut conn = ScriptedConnection::new("H2");
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history
        .run_all(&mut conn, &[sql("1.0__a", "create table a (id int);")])
        .unwrap();
    assert_eq!(conn.count("create table a"), 0);
    assert_eq!(conn.count("insert into db_migration"), 1);
    assert_eq!(
        actions(&history.into_outcome()),
        vec![("1.0".to_string(), Action::Recorded)]
    );
}

#[test]
fn test_allow_error_in_repeatable_uses_savepoint() {
    let config = MigrationConfig {
        allow_error_in_repeatable: true,
        ..MigrationConfig::default()
    };
    let mut conn = ScriptedConnection::new("H2").fail_on("broken_view", "no such column");
    let migrations = vec![
        sql("1.0__a", "a;"),
        sql("R__views", "create view broken_view as select x from a;"),
    ];
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history.run_all(&mut conn, &migrations).unwrap();

    assert_eq!(conn.count("savepoint sw_repeatable"), 2);
    assert_eq!(conn.count("rollback to savepoint sw_repeatable"), 1);
    assert!(history.get("views").is_none());
    assert!(history.get("1.0").is_some());
}

#[test]
fn test_failure_propagates_without_allow_error() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2").fail_on("broken_view", "no such column");
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    let err = history
        .run_all(
            &mut conn,
            &[sql("R__views", "create view broken_view as select x from a;")],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(conn.count("savepoint"), 0);
}

#[test]
fn test_missing_prior_halts() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let prior = sql("1.0__a", "a;");
    let next = sql("1.1__b", "b;");
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    let step = history.apply(&mut conn, &next, Some(&prior)).unwrap();
    assert_eq!(step, Step::Halt);
    assert!(conn.calls().is_empty());

    // recorded prior lets the next one run
    let mut history =
        HistoryTable::new(TABLE, &config, generic(), vec![recorded(1, "1.0__a", "a;")]);
    let step = history.apply(&mut conn, &next, Some(&prior)).unwrap();
    assert_eq!(step, Step::Continue);
    assert_eq!(conn.count("b;"), 1);
}

#[test]
fn test_boot_init_path() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let boot = sql("1.3__baseline", "create table everything (id int);");
    let migrations = vec![
        sql("I__roles", "create role app;"),
        sql("1.0__a", "a;"),
        sql("1.3__c", "c;"),
        sql("1.4__d", "d;"),
        sql("R__views", "v;"),
    ];
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history.run_init(&mut conn, &boot, &migrations).unwrap();

    let executed: Vec<&str> = conn
        .statements()
        .into_iter()
        .filter(|s| !s.starts_with("insert into db_migration"))
        .collect();
    assert_eq!(
        executed,
        vec![
            "create role app;",
            "create table everything (id int);",
            "d;",
            "v;"
        ]
    );
    assert_eq!(history.boot_init_version().unwrap().normalised(), "1.3");
    assert!(history.get("1.0").is_none());
    let boot_row = history.get("1.3").unwrap();
    assert_eq!(boot_row.kind(), VersionKind::BootInit);
    assert_eq!(boot_row.id(), 2);

    let outcome = history.into_outcome();
    assert_eq!(
        actions(&outcome),
        vec![
            ("roles".to_string(), Action::Executed),
            ("1.3".to_string(), Action::BootInit),
            ("1.4".to_string(), Action::Executed),
            ("views".to_string(), Action::Executed)
        ]
    );
}

#[test]
fn test_versions_below_recorded_boot_init_are_skipped() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("H2");
    let existing = vec![HistoryRow::new(1, version("1.3").as_boot_init(), 0, "t", 0)];
    let migrations = vec![sql("1.0__a", "a;"), sql("1.3__c", "c;"), sql("1.4__d", "d;")];
    let mut history = HistoryTable::new(TABLE, &config, generic(), existing);
    history.run_all(&mut conn, &migrations).unwrap();
    assert_eq!(conn.count("a;"), 0);
    assert_eq!(conn.count("c;"), 0);
    assert_eq!(conn.count("d;"), 1);
}

#[test]
fn test_postgres_concurrent_index_deferred() {
    let config = MigrationConfig::default();
    let mut conn = ScriptedConnection::new("PostgreSQL");
    let script = "create table t (id int);\ncreate index concurrently ix_t on t (id);";
    let mut history = HistoryTable::new(
        TABLE,
        &config,
        Platform::for_name(PlatformName::Postgres),
        Vec::new(),
    );
    history.run_all(&mut conn, &[sql("1.0__t", script)]).unwrap();
    assert_eq!(conn.count("concurrently"), 0);

    let outcome = history.into_outcome();
    assert_eq!(outcome.deferred.len(), 1);
    assert_eq!(
        outcome.deferred[0].statements,
        vec!["create index concurrently ix_t on t (id);"]
    );
    assert!(!outcome.deferred[0].allow_error);
}

#[test]
fn test_placeholders_and_early_checksum() {
    let mut config = MigrationConfig::default();
    config.placeholders.insert("schema", "app");
    let content = "create table ${schema}.t (id int);";

    let resource = sql("1.0__t", content);
    assert_eq!(
        local_checksum(&config, None, &resource).unwrap(),
        compute_checksum("create table app.t (id int);")
    );

    config.early_checksum_mode = true;
    assert_eq!(
        local_checksum(&config, None, &resource).unwrap(),
        compute_checksum(content)
    );

    let mut conn = ScriptedConnection::new("H2");
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    history.run_all(&mut conn, &[resource]).unwrap();
    assert_eq!(conn.count("create table app.t (id int);"), 1);
}

#[test]
fn test_precomputed_checksum_is_used() {
    let config = MigrationConfig::default();
    let resource = sql("1.0__a", "a;").with_checksum(42);
    assert_eq!(local_checksum(&config, None, &resource).unwrap(), 42);
}

struct SeedUsers;

impl ProgrammaticMigration for SeedUsers {
    fn checksum(&self) -> i32 {
        7
    }

    fn migrate(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        ctx.execute("insert into users values (?)", &[SqlValue::from("admin")])?;
        Ok(())
    }
}

#[test]
fn test_programmatic_migration() {
    let config = MigrationConfig::default();
    let registry = MigrationRegistry::new().register("seed_users", || SeedUsers);
    let resource = MigrationResource::programmatic("1.1__seed", "seed_users", "seed_users").unwrap();
    let mut conn = ScriptedConnection::new("H2");
    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new())
        .with_factory(Some(&registry));
    history.run_all(&mut conn, &[resource.clone()]).unwrap();

    assert_eq!(conn.count("insert into users"), 1);
    assert_eq!(history.get("1.1").unwrap().checksum(), 7);

    let mut history = HistoryTable::new(TABLE, &config, generic(), Vec::new());
    let err = history.run_all(&mut conn, &[resource]).unwrap_err();
    assert!(matches!(err, MigrationError::UnknownProgrammatic { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
