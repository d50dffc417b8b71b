use std::io::Write as _;
use std::sync::Arc;
use tempfile::TempDir;
use walpool_core::{ContextCallback, LockKind, PoolError, Registry, SqlValue};

fn silent_callback() -> ContextCallback {
    Arc::new(|_db: &str, _ctx: &str| {})
}

fn write_script(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.to_str().unwrap().to_owned()
}

#[test]
fn import_executes_every_statement_in_one_transaction() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();
    registry
        .open("db1", base, 0, silent_callback(), None)
        .unwrap();

    let script = write_script(
        &dir,
        "seed.sql",
        "-- seed data\n\
         CREATE TABLE t (x INT, label TEXT);\n\
         INSERT INTO t VALUES (1, 'one;still one');\n\
         INSERT INTO t VALUES (2, 'two');\n",
    );

    registry.request_lock("db1", "w", LockKind::Write).unwrap();
    let commands = registry.import_file("db1", &script).unwrap();
    assert_eq!(commands, 3);

    let outcome = registry
        .execute_in_context("db1", "w", "SELECT COUNT(*) AS n FROM t", &[])
        .unwrap();
    assert_eq!(outcome.rows[0]["n"], SqlValue::Integer(2));

    let outcome = registry
        .execute_in_context("db1", "w", "SELECT label FROM t WHERE x = 1", &[])
        .unwrap();
    assert_eq!(
        outcome.rows[0]["label"],
        SqlValue::Text("one;still one".into())
    );
}

#[test]
fn failed_statement_rolls_the_import_back() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();
    registry
        .open("db1", base, 0, silent_callback(), None)
        .unwrap();

    registry.request_lock("db1", "w", LockKind::Write).unwrap();
    registry
        .execute_literal_in_context("db1", "w", "CREATE TABLE t (x INT)")
        .unwrap();

    let script = write_script(
        &dir,
        "broken.sql",
        "INSERT INTO t VALUES (1);\nINSERT INTO nope VALUES (2);\n",
    );

    let err = registry.import_file("db1", &script).unwrap_err();
    match err {
        PoolError::ImportFailed {
            statement, line, ..
        } => {
            assert_eq!(statement, 1);
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    let outcome = registry
        .execute_in_context("db1", "w", "SELECT COUNT(*) AS n FROM t", &[])
        .unwrap();
    assert_eq!(outcome.rows[0]["n"], SqlValue::Integer(0));
}

#[test]
fn missing_script_file_reports_io_error() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();
    registry
        .open("db1", base, 0, silent_callback(), None)
        .unwrap();

    let err = registry
        .import_file("db1", &format!("{base}/nope.sql"))
        .unwrap_err();
    assert!(matches!(err, PoolError::Io(_)));
}
