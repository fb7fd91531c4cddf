use super::*;
use crate::test_utils::ScriptedConnection;

fn statements(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_runs_statements_in_order() {
    let mut conn = ScriptedConnection::new("H2");
    let count = DdlRunner::new("V1__init.sql")
        .run_all(&mut conn, &statements(&["create table a (id int)", "insert into a values (1)"]))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        conn.statements(),
        vec!["create table a (id int)", "insert into a values (1)"]
    );
}

#[test]
fn test_first_failure_stops_run() {
    let mut conn = ScriptedConnection::new("H2").fail_on("bad", "syntax error");
    let err = DdlRunner::new("V1__init.sql")
        .run_all(&mut conn, &statements(&["select 1", "bad sql", "select 2"]))
        .unwrap_err();
    match err {
        MigrationError::Execution {
            location,
            statement,
            ..
        } => {
            assert_eq!(location, "V1__init.sql");
            assert_eq!(statement, "bad sql");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.count("select 2"), 0);
}

#[test]
fn test_tolerant_mode_continues() {
    let mut conn = ScriptedConnection::new("H2").fail_on("bad", "syntax error");
    let count = DdlRunner::new("R__views.sql")
        .tolerant(true)
        .run_all(&mut conn, &statements(&["select 1", "bad sql", "select 2"]))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(conn.count("select 2"), 1);
}

#[test]
fn test_deferred_script_uses_allow_error() {
    let mut conn = ScriptedConnection::new("PostgreSQL").fail_on("concurrently", "already exists");
    let script = DeferredScript {
        location: "V2__idx.sql".to_string(),
        statements: statements(&["create index concurrently ix on t (a)"]),
        allow_error: true,
    };
    assert_eq!(script.run(&mut conn).unwrap(), 0);

    let strict = DeferredScript {
        allow_error: false,
        ..script
    };
    assert!(strict.run(&mut conn).is_err());
}
