//! Process-wide database registry.
//!
//! # Responsibility
//! - Map database names to open pools with unique keys.
//! - Route caller operations (name + context ID) to the right pool.
//!
//! # Invariants
//! - Opening a name that is already mapped fails; it never replaces a pool.
//! - The registry lock is released before any context-bound SQL executes.
//!
//! The registry is an explicit object rather than a process global so tests
//! can run isolated instances side by side; embedders keep one registry for
//! the process lifetime.

use crate::paths;
use crate::pool::{
    ContextCallback, LockKind, Pool, PoolError, PoolResult, UpdateHookFn,
};
use crate::value::{QueryOutcome, SqlValue};
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Name-keyed collection of open [`Pool`]s.
#[derive(Default)]
pub struct Registry {
    pools: Mutex<HashMap<String, Arc<Pool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `db_name` with `max_readers` read connections.
    ///
    /// `on_context` receives every lock grant; `update_hook`, when given, is
    /// installed on the write connection before any user work runs.
    pub fn open(
        &self,
        db_name: &str,
        base_path: &str,
        max_readers: u32,
        on_context: ContextCallback,
        update_hook: Option<UpdateHookFn>,
    ) -> PoolResult<()> {
        let mut pools = self.pools_guard();
        if pools.contains_key(db_name) {
            return Err(PoolError::AlreadyOpen(db_name.to_owned()));
        }

        let pool = Pool::open(
            db_name,
            &paths::db_path(db_name, base_path),
            max_readers,
            on_context,
        )?;
        if let Some(hook) = update_hook {
            pool.register_update_hook(hook);
        }
        pools.insert(db_name.to_owned(), Arc::new(pool));

        info!("event=registry_open module=registry status=ok db={db_name}");
        Ok(())
    }

    /// Closes `db_name` and removes it from the registry.
    pub fn close(&self, db_name: &str) -> PoolResult<()> {
        let pool = {
            let mut pools = self.pools_guard();
            pools
                .remove(db_name)
                .ok_or_else(|| PoolError::NotOpen(db_name.to_owned()))?
        };
        pool.close_all();
        info!("event=registry_close module=registry status=ok db={db_name}");
        Ok(())
    }

    /// Closes every open pool. Process-shutdown hook.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut pools = self.pools_guard();
            pools.drain().collect()
        };
        for (_, pool) in &drained {
            pool.close_all();
        }
        info!(
            "event=registry_close_all module=registry status=ok closed={}",
            drained.len()
        );
    }

    /// Requests a lock; the grant arrives through the pool's context
    /// callback.
    pub fn request_lock(&self, db_name: &str, context_id: &str, kind: LockKind) -> PoolResult<()> {
        self.pool(db_name)?.request_lock(context_id, kind);
        Ok(())
    }

    /// Releases a lock context and drains the next waiter.
    ///
    /// A silent no-op when `db_name` is not open: callers may release after
    /// a timeout raced with close.
    pub fn release_lock(&self, db_name: &str, context_id: &str) {
        if let Ok(pool) = self.pool(db_name) {
            pool.release_context(context_id);
        }
    }

    /// Executes a parameterized statement in a granted context.
    pub fn execute_in_context(
        &self,
        db_name: &str,
        context_id: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> PoolResult<QueryOutcome> {
        self.pool(db_name)?.execute_in_context(context_id, sql, params)
    }

    /// Executes a parameter-free statement in a granted context.
    pub fn execute_literal_in_context(
        &self,
        db_name: &str,
        context_id: &str,
        sql: &str,
    ) -> PoolResult<u64> {
        self.pool(db_name)?
            .execute_literal_in_context(context_id, sql)
    }

    /// Attaches `db_file` under `alias` on every connection of `db_name`.
    pub fn attach(
        &self,
        db_name: &str,
        db_file: &str,
        base_path: &str,
        alias: &str,
    ) -> PoolResult<()> {
        self.pool(db_name)?.attach_database(db_file, base_path, alias)
    }

    /// Detaches `alias` on every connection of `db_name`.
    pub fn detach(&self, db_name: &str, alias: &str) -> PoolResult<()> {
        self.pool(db_name)?.detach_database(alias)
    }

    /// Imports a SQL script through the writer of `db_name`.
    pub fn import_file(&self, db_name: &str, file_path: &str) -> PoolResult<usize> {
        self.pool(db_name)?.import_sql_file(file_path)
    }

    /// Installs (or replaces) the update hook on the writer of `db_name`.
    pub fn register_update_hook(&self, db_name: &str, hook: UpdateHookFn) -> PoolResult<()> {
        self.pool(db_name)?.register_update_hook(hook);
        Ok(())
    }

    /// Deletes the database file for `db_name`, closing it first if open.
    ///
    /// A missing file is success: the end state (no such database) already
    /// holds. Callers must not race `remove` with a concurrent `open` of the
    /// same name.
    pub fn remove(&self, db_name: &str, base_path: &str) -> PoolResult<()> {
        let open = {
            let pools = self.pools_guard();
            pools.contains_key(db_name)
        };
        if open {
            self.close(db_name)?;
        }

        let file_path = paths::db_path(db_name, base_path);
        if !Path::new(&file_path).exists() {
            info!(
                "event=registry_remove module=registry status=ok db={db_name} detail=file_not_found path={file_path}"
            );
            return Ok(());
        }

        std::fs::remove_file(&file_path)?;
        info!("event=registry_remove module=registry status=ok db={db_name}");
        Ok(())
    }

    fn pool(&self, db_name: &str) -> PoolResult<Arc<Pool>> {
        let pools = self.pools_guard();
        pools
            .get(db_name)
            .cloned()
            .ok_or_else(|| PoolError::NotOpen(db_name.to_owned()))
    }

    fn pools_guard(&self) -> MutexGuard<'_, HashMap<String, Arc<Pool>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
