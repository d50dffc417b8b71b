//! Database path resolution.
//!
//! # Responsibility
//! - Map a database name plus base directory to the path handed to SQLite.
//!
//! # Invariants
//! - `:memory:` and SQLite URI forms pass through unchanged.

/// Resolves the on-disk path for `db_name` under `base_path`.
pub fn db_path(db_name: &str, base_path: &str) -> String {
    if db_name == ":memory:" || db_name.starts_with("file:") {
        return db_name.to_owned();
    }
    if base_path.is_empty() {
        return db_name.to_owned();
    }
    format!("{}/{}", base_path.trim_end_matches('/'), db_name)
}
