use std::sync::Arc;
use tempfile::TempDir;
use walpool_core::{ContextCallback, LockKind, PoolError, Registry};

fn silent_callback() -> ContextCallback {
    Arc::new(|_db: &str, _ctx: &str| {})
}

#[test]
fn open_twice_fails_with_already_open() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();

    registry
        .open("db1", base, 1, silent_callback(), None)
        .unwrap();
    let err = registry
        .open("db1", base, 1, silent_callback(), None)
        .unwrap_err();
    assert!(matches!(err, PoolError::AlreadyOpen(_)));
    assert_eq!(err.to_string(), "db1 is already open");
}

#[test]
fn operations_on_unknown_name_fail_with_not_open() {
    let registry = Registry::new();

    let err = registry.close("ghost").unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));
    assert_eq!(err.to_string(), "ghost is not open");

    let err = registry
        .request_lock("ghost", "ctx", LockKind::Read)
        .unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));

    let err = registry
        .execute_in_context("ghost", "ctx", "SELECT 1", &[])
        .unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));

    let err = registry.detach("ghost", "alias").unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));
}

#[test]
fn release_lock_on_unknown_name_is_silent() {
    let registry = Registry::new();
    registry.release_lock("ghost", "ctx");
}

#[test]
fn close_makes_name_reusable() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();

    registry
        .open("db1", base, 1, silent_callback(), None)
        .unwrap();
    registry.close("db1").unwrap();

    let err = registry.close("db1").unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));

    registry
        .open("db1", base, 1, silent_callback(), None)
        .unwrap();
    registry.close("db1").unwrap();
}

#[test]
fn close_all_clears_every_entry() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();

    registry
        .open("db1", base, 0, silent_callback(), None)
        .unwrap();
    registry
        .open("db2", base, 1, silent_callback(), None)
        .unwrap();

    registry.close_all();

    assert!(matches!(
        registry.close("db1").unwrap_err(),
        PoolError::NotOpen(_)
    ));
    assert!(matches!(
        registry.close("db2").unwrap_err(),
        PoolError::NotOpen(_)
    ));
}

#[test]
fn remove_of_never_opened_database_is_ok() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();

    registry
        .remove("never-existed", dir.path().to_str().unwrap())
        .unwrap();
}

#[test]
fn remove_closes_and_deletes_the_file() {
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
    registry.release_lock("db1", "w");

    let file_path = dir.path().join("db1");
    assert!(file_path.exists());

    registry.remove("db1", base).unwrap();
    assert!(!file_path.exists());
    assert!(matches!(
        registry.close("db1").unwrap_err(),
        PoolError::NotOpen(_)
    ));
}

#[test]
fn work_after_close_is_rejected_not_hung() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_str().unwrap();
    let registry = Registry::new();

    registry
        .open("db1", base, 0, silent_callback(), None)
        .unwrap();
    registry.request_lock("db1", "w", LockKind::Write).unwrap();
    registry.close("db1").unwrap();

    // The pool is gone from the registry; the context routes nowhere.
    let err = registry
        .execute_literal_in_context("db1", "w", "SELECT 1")
        .unwrap_err();
    assert!(matches!(err, PoolError::NotOpen(_)));
}
