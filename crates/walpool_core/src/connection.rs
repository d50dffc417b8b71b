//! Worker-owned SQLite connection with a FIFO work queue and a lock slot.
//!
//! # Responsibility
//! - Own exactly one SQLite handle and execute queued work items serially on
//!   a dedicated worker thread.
//! - Track which lock context, if any, is currently bound to this handle.
//!
//! # Invariants
//! - The SQLite handle is touched only from the worker thread after open.
//! - Work items execute strictly in enqueue order and never interleave.
//! - At most one context occupies the lock slot at any time.

use crate::pool::{PoolError, PoolResult};
use log::{debug, error, info};
use rusqlite::{Connection, OpenFlags};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Work item applied to the worker-owned handle.
pub type WorkItem = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

struct WorkQueue {
    items: VecDeque<WorkItem>,
    closing: bool,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    ready: Condvar,
    lock_slot: Mutex<Option<String>>,
}

impl Shared {
    // Scheduling must stay live even if a work item panicked while queued.
    fn queue_guard(&self) -> MutexGuard<'_, WorkQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_guard(&self) -> MutexGuard<'_, Option<String>> {
        self.lock_slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One physical SQLite connection plus its serial executor.
pub struct PooledConnection {
    label: String,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PooledConnection {
    /// Opens the SQLite handle with the given flags and starts the worker.
    ///
    /// The handle is moved into the worker closure at spawn time; nothing
    /// outside that closure can reach it afterwards.
    pub fn open(db_path: &str, flags: OpenFlags, label: impl Into<String>) -> PoolResult<Self> {
        let label = label.into();
        let conn = Connection::open_with_flags(db_path, flags).map_err(|err| {
            error!(
                "event=connection_open module=connection status=error label={} error={}",
                label, err
            );
            PoolError::Sqlite(err)
        })?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                items: VecDeque::new(),
                closing: false,
            }),
            ready: Condvar::new(),
            lock_slot: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("walpool-{label}"))
            .spawn(move || worker_loop(conn, worker_shared))
            .map_err(PoolError::Io)?;

        debug!(
            "event=connection_open module=connection status=ok label={}",
            label
        );

        Ok(Self {
            label,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Appends a work item to the queue; returns immediately.
    ///
    /// Items queued after [`close`](Self::close) are rejected. A rejected
    /// item is dropped, which disconnects any result channel it captured.
    pub fn queue_work<F>(&self, work: F)
    where
        F: FnOnce(&mut Connection) + Send + 'static,
    {
        let mut queue = self.shared.queue_guard();
        if queue.closing {
            debug!(
                "event=work_rejected module=connection status=error label={} reason=closing",
                self.label
            );
            return;
        }
        queue.items.push_back(Box::new(work));
        drop(queue);
        self.shared.ready.notify_one();
    }

    /// Queues a work item and blocks until its result arrives.
    ///
    /// Returns [`PoolError::Closing`] when the connection shut down before
    /// the item could run.
    pub fn run_blocking<T, F>(&self, work: F) -> PoolResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.queue_work(move |conn| {
            let _ = tx.send(work(conn));
        });
        rx.recv().map_err(|_| PoolError::Closing)
    }

    /// Binds `context_id` to the vacant lock slot.
    ///
    /// The pool is the only caller and guarantees the slot is vacant.
    pub fn activate_lock(&self, context_id: &str) {
        let mut slot = self.shared.slot_guard();
        debug_assert!(slot.is_none(), "lock slot already occupied");
        *slot = Some(context_id.to_owned());
    }

    /// Whether the slot currently holds `context_id`.
    pub fn matches_lock(&self, context_id: &str) -> bool {
        self.shared.slot_guard().as_deref() == Some(context_id)
    }

    /// Whether the slot is vacant.
    pub fn is_vacant_lock(&self) -> bool {
        self.shared.slot_guard().is_none()
    }

    /// Vacates the slot.
    pub fn clear_lock(&self) {
        *self.shared.slot_guard() = None;
    }

    /// Shuts the worker down; safe to call more than once.
    ///
    /// Pending items are drained and rejected rather than run, so callers
    /// blocked in [`run_blocking`](Self::run_blocking) observe a
    /// deterministic [`PoolError::Closing`] instead of hanging.
    pub fn close(&self) {
        let rejected = {
            let mut queue = self.shared.queue_guard();
            if queue.closing {
                0
            } else {
                queue.closing = true;
                let pending = queue.items.len();
                queue.items.clear();
                pending
            }
        };
        self.shared.ready.notify_all();

        let joined = {
            let mut worker = self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            worker.take()
        };
        if let Some(handle) = joined {
            let _ = handle.join();
            info!(
                "event=connection_close module=connection status=ok label={} rejected_items={}",
                self.label, rejected
            );
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(mut conn: Connection, shared: Arc<Shared>) {
    loop {
        let item = {
            let mut queue = shared.queue_guard();
            loop {
                if let Some(item) = queue.items.pop_front() {
                    break item;
                }
                if queue.closing {
                    // Dropping the handle finalizes statements and closes
                    // the database.
                    return;
                }
                queue = shared
                    .ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        item(&mut conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec;

    fn memory_flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }

    #[test]
    fn work_items_run_in_enqueue_order() {
        let conn = PooledConnection::open(":memory:", memory_flags(), "test").unwrap();
        conn.run_blocking(|c| exec::run_literal(c, "CREATE TABLE seq (n INTEGER)"))
            .unwrap()
            .unwrap();

        for n in 0..20 {
            conn.queue_work(move |c| {
                let _ = exec::run_literal(c, &format!("INSERT INTO seq VALUES ({n})"));
            });
        }

        let outcome = conn
            .run_blocking(|c| exec::run_query(c, "SELECT n FROM seq ORDER BY rowid", &[]))
            .unwrap()
            .unwrap();
        let observed: Vec<_> = outcome
            .rows
            .iter()
            .map(|row| row["n"].clone())
            .collect();
        let expected: Vec<_> = (0..20).map(crate::value::SqlValue::Integer).collect();
        assert_eq!(observed, expected);
    }

    #[test]
    fn lock_slot_transitions() {
        let conn = PooledConnection::open(":memory:", memory_flags(), "test").unwrap();
        assert!(conn.is_vacant_lock());
        conn.activate_lock("ctx-1");
        assert!(conn.matches_lock("ctx-1"));
        assert!(!conn.matches_lock("ctx-2"));
        assert!(!conn.is_vacant_lock());
        conn.clear_lock();
        assert!(conn.is_vacant_lock());
    }

    #[test]
    fn close_rejects_later_work_and_is_idempotent() {
        let conn = PooledConnection::open(":memory:", memory_flags(), "test").unwrap();
        conn.close();
        conn.close();

        let result = conn.run_blocking(|c| exec::run_literal(c, "SELECT 1"));
        assert!(matches!(result, Err(PoolError::Closing)));
    }
}
