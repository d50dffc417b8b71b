//! Concurrent WAL-mode SQLite connection pool.
//!
//! One write connection and N read connections multiplex many logical lock
//! contexts over a single database file. Each physical connection owns a
//! dedicated worker thread with a FIFO work queue; lock requests queue per
//! kind and grants surface through a context-available callback, so an
//! embedding layer above can hand out contexts asynchronously.

pub mod connection;
pub mod exec;
mod import;
pub mod logging;
pub mod paths;
pub mod pool;
pub mod registry;
pub mod value;

pub use logging::{default_log_level, init_logging, logging_status};
pub use pool::{
    ContextCallback, LockKind, Pool, PoolError, PoolResult, UpdateEvent, UpdateHookFn, UpdateOp,
};
pub use registry::Registry;
pub use value::{ColumnInfo, QueryOutcome, SqlValue};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
