//! Connection pool: one writer, N readers, FIFO lock scheduling.
//!
//! # Responsibility
//! - Grant read/write lock contexts against physical connections.
//! - Route context-bound work to the matching connection worker.
//! - Coordinate multi-connection operations (attach/detach, import).
//!
//! # Invariants
//! - A context ID appears in at most one wait queue or as the holder of at
//!   most one lock slot, never both.
//! - Wait queues are FIFO per lock kind; readers and writers never block
//!   each other at pool level.
//! - The scheduling mutex is never held while SQLite work executes.
//! - `on_context_available` fires with the scheduling mutex released.

use crate::connection::PooledConnection;
use crate::exec;
use crate::import;
use crate::paths;
use crate::value::{QueryOutcome, SqlValue};
use log::{debug, error, info, warn};
use rusqlite::hooks::Action;
use rusqlite::OpenFlags;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// WAL journal size limit queued on the writer at open (1.5x the default
/// checkpoint size).
const JOURNAL_SIZE_LIMIT_BYTES: u64 = 6_291_456;

pub type PoolResult<T> = Result<T, PoolError>;

/// Pool and registry level error for lock, execution and lifecycle faults.
#[derive(Debug)]
pub enum PoolError {
    /// Operation targets a database name that is not open.
    NotOpen(String),
    /// Open called for a name that already has a pool.
    AlreadyOpen(String),
    /// Work issued against a context not bound to any connection.
    ContextInvalid,
    /// Attach/detach attempted while some lock slot is occupied.
    ConnectionsLocked(String),
    /// Wrapped SQLite failure.
    Sqlite(rusqlite::Error),
    /// Filesystem failure during remove or import.
    Io(std::io::Error),
    /// The target connection shut down before the work item could run.
    Closing,
    /// A statement inside an imported script failed; the run was rolled back.
    ImportFailed {
        statement: usize,
        line: usize,
        message: String,
    },
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen(name) => write!(f, "{name} is not open"),
            Self::AlreadyOpen(name) => write!(f, "{name} is already open"),
            Self::ContextInvalid => write!(f, "context is no longer available"),
            Self::ConnectionsLocked(name) => {
                write!(f, "{name}: some DB connections were locked")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Closing => write!(f, "connection is closing"),
            Self::ImportFailed {
                statement,
                line,
                message,
            } => write!(
                f,
                "import failed at statement {statement} (line {line}): {message}"
            ),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PoolError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for PoolError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Kind of lock a context requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

/// Fired once per granted lock with `(database_name, context_id)`.
///
/// Invoked with the scheduling mutex released, from the thread that
/// performed the grant. The callback must not re-enter the pool for the
/// same database synchronously.
pub type ContextCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Row-change operation reported by the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Insert,
    Delete,
    Update,
}

impl UpdateOp {
    /// SQLite authorizer op code for this change kind.
    pub fn code(self) -> i32 {
        match self {
            Self::Insert => 18,
            Self::Delete => 9,
            Self::Update => 23,
        }
    }

    fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::SQLITE_INSERT => Some(Self::Insert),
            Action::SQLITE_DELETE => Some(Self::Delete),
            Action::SQLITE_UPDATE => Some(Self::Update),
            _ => None,
        }
    }
}

/// One committed row change observed on the write connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    /// Database name the pool was opened under.
    pub database: String,
    pub op: UpdateOp,
    pub table: String,
    pub row_id: i64,
}

/// Receives [`UpdateEvent`]s from the write connection.
pub type UpdateHookFn = Arc<dyn Fn(UpdateEvent) + Send + Sync>;

struct SchedState {
    read_waiters: VecDeque<String>,
    write_waiters: VecDeque<String>,
}

/// One write connection plus N read connections over a single database file.
pub struct Pool {
    name: String,
    write: PooledConnection,
    readers: Vec<PooledConnection>,
    sched: Mutex<SchedState>,
    on_context: ContextCallback,
}

impl Pool {
    /// Opens the writer and `max_readers` readers, then queues WAL setup.
    ///
    /// The writer opens first so the database file exists before read-only
    /// handles open. WAL setup rides the FIFO queues, so it always runs
    /// before any user work.
    pub fn open(
        name: impl Into<String>,
        db_path: &str,
        max_readers: u32,
        on_context: ContextCallback,
    ) -> PoolResult<Self> {
        let name = name.into();

        let write = PooledConnection::open(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            format!("{name}-write"),
        )?;

        let mut readers = Vec::with_capacity(max_readers as usize);
        for index in 0..max_readers {
            readers.push(PooledConnection::open(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
                format!("{name}-read{index}"),
            )?);
        }

        let pool = Self {
            name,
            write,
            readers,
            sched: Mutex::new(SchedState {
                read_waiters: VecDeque::new(),
                write_waiters: VecDeque::new(),
            }),
            on_context,
        };

        if pool.concurrency_enabled() {
            let journal_limit = format!("PRAGMA journal_size_limit = {JOURNAL_SIZE_LIMIT_BYTES}");
            pool.write.queue_work(move |conn| {
                for sql in [
                    "PRAGMA journal_mode = WAL",
                    journal_limit.as_str(),
                    "PRAGMA synchronous = NORMAL",
                ] {
                    if let Err(err) = exec::run_literal(conn, sql) {
                        error!(
                            "event=wal_setup module=pool status=error statement={sql} error={err}"
                        );
                    }
                }
            });
            for reader in &pool.readers {
                reader.queue_work(|conn| {
                    if let Err(err) = exec::run_literal(conn, "PRAGMA synchronous = NORMAL") {
                        error!("event=wal_setup module=pool status=error error={err}");
                    }
                });
            }
        }

        info!(
            "event=pool_open module=pool status=ok db={} readers={}",
            pool.name,
            pool.readers.len()
        );
        Ok(pool)
    }

    /// Database name this pool was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether read traffic has dedicated connections.
    pub fn concurrency_enabled(&self) -> bool {
        !self.readers.is_empty()
    }

    /// Requests a lock for `context_id`; the grant arrives via the
    /// context-available callback, immediately when a slot is vacant.
    pub fn request_lock(&self, context_id: &str, kind: LockKind) {
        match kind {
            LockKind::Read => self.read_lock(context_id),
            LockKind::Write => self.write_lock(context_id),
        }
    }

    fn read_lock(&self, context_id: &str) {
        // Without readers every context shares the write connection.
        if !self.concurrency_enabled() {
            return self.write_lock(context_id);
        }

        let granted = {
            let mut sched = self.sched_guard();
            if !sched.read_waiters.is_empty() {
                // Preserve FIFO fairness among queued readers.
                sched.read_waiters.push_back(context_id.to_owned());
                false
            } else if let Some(reader) = self.readers.iter().find(|r| r.is_vacant_lock()) {
                reader.activate_lock(context_id);
                true
            } else {
                sched.read_waiters.push_back(context_id.to_owned());
                false
            }
        };

        if granted {
            self.notify_context_available(context_id);
        } else {
            debug!(
                "event=lock_wait module=pool db={} ctx={} kind=read",
                self.name, context_id
            );
        }
    }

    fn write_lock(&self, context_id: &str) {
        let granted = {
            let mut sched = self.sched_guard();
            if self.write.is_vacant_lock() {
                self.write.activate_lock(context_id);
                true
            } else {
                sched.write_waiters.push_back(context_id.to_owned());
                false
            }
        };

        if granted {
            self.notify_context_available(context_id);
        } else {
            debug!(
                "event=lock_wait module=pool db={} ctx={} kind=write",
                self.name, context_id
            );
        }
    }

    /// Releases `context_id` and hands its connection to the next waiter of
    /// the same kind, if any. Unknown context IDs are a silent no-op.
    pub fn release_context(&self, context_id: &str) {
        let next = {
            let mut sched = self.sched_guard();
            if self.write.matches_lock(context_id) {
                self.write.clear_lock();
                if let Some(waiter) = sched.write_waiters.pop_front() {
                    self.write.activate_lock(&waiter);
                    Some(waiter)
                } else {
                    None
                }
            } else if let Some(reader) = self.readers.iter().find(|r| r.matches_lock(context_id))
            {
                reader.clear_lock();
                if let Some(waiter) = sched.read_waiters.pop_front() {
                    reader.activate_lock(&waiter);
                    Some(waiter)
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(waiter) = next {
            self.notify_context_available(&waiter);
        }
    }

    /// Queues raw work on the connection bound to `context_id`.
    ///
    /// This is the only route by which user SQL reaches a handle once a lock
    /// has been granted; the execute helpers below layer result channels on
    /// top of it.
    pub fn queue_in_context<F>(&self, context_id: &str, work: F) -> PoolResult<()>
    where
        F: FnOnce(&mut rusqlite::Connection) + Send + 'static,
    {
        let conn = self
            .connection_for(context_id)
            .ok_or(PoolError::ContextInvalid)?;
        conn.queue_work(work);
        Ok(())
    }

    /// Executes a parameterized statement on the connection bound to
    /// `context_id`.
    pub fn execute_in_context(
        &self,
        context_id: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> PoolResult<QueryOutcome> {
        let conn = self
            .connection_for(context_id)
            .ok_or(PoolError::ContextInvalid)?;
        let sql = sql.to_owned();
        let params = params.to_vec();
        conn.run_blocking(move |c| exec::run_query(c, &sql, &params))?
            .map_err(PoolError::Sqlite)
    }

    /// Executes a parameter-free statement on the connection bound to
    /// `context_id`; returns the affected-row count.
    pub fn execute_literal_in_context(&self, context_id: &str, sql: &str) -> PoolResult<u64> {
        let conn = self
            .connection_for(context_id)
            .ok_or(PoolError::ContextInvalid)?;
        let sql = sql.to_owned();
        conn.run_blocking(move |c| exec::run_literal(c, &sql))?
            .map_err(PoolError::Sqlite)
    }

    /// Attaches another database file under `alias` on every connection.
    ///
    /// All lock slots must be vacant: the alias has to become visible to
    /// every connection before any context can reference it. A failure
    /// part-way through triggers a best-effort detach of the alias.
    pub fn attach_database(
        &self,
        db_file: &str,
        base_path: &str,
        alias: &str,
    ) -> PoolResult<()> {
        self.require_all_vacant()?;

        let attach_path = paths::db_path(db_file, base_path);
        let statement = format!("ATTACH DATABASE '{attach_path}' AS {alias}");

        for conn in self.all_connections() {
            if let Err(err) = self.run_literal_on(conn, &statement) {
                warn!(
                    "event=attach module=pool status=error db={} alias={} error={}",
                    self.name, alias, err
                );
                if let Err(revert_err) = self.detach_database(alias) {
                    warn!(
                        "event=attach_revert module=pool status=error db={} alias={} error={}",
                        self.name, alias, revert_err
                    );
                }
                return Err(err);
            }
        }

        info!(
            "event=attach module=pool status=ok db={} alias={}",
            self.name, alias
        );
        Ok(())
    }

    /// Detaches `alias` on every connection. All lock slots must be vacant.
    pub fn detach_database(&self, alias: &str) -> PoolResult<()> {
        self.require_all_vacant()?;

        let statement = format!("DETACH DATABASE {alias}");
        for conn in self.all_connections() {
            self.run_literal_on(conn, &statement)?;
        }

        info!(
            "event=detach module=pool status=ok db={} alias={}",
            self.name, alias
        );
        Ok(())
    }

    /// Installs `hook` on the write connection; replaces any previous hook.
    ///
    /// Only the writer mutates rows, so readers never carry a hook. The
    /// event's database name outlives the hook because it is cloned per
    /// event from pool-owned state.
    pub fn register_update_hook(&self, hook: UpdateHookFn) {
        let database = self.name.clone();
        self.write.queue_work(move |conn| {
            conn.update_hook(Some(
                move |action: Action, _schema: &str, table: &str, row_id: i64| {
                    if let Some(op) = UpdateOp::from_action(action) {
                        hook(UpdateEvent {
                            database: database.clone(),
                            op,
                            table: table.to_owned(),
                            row_id,
                        });
                    }
                },
            ));
        });
    }

    /// Runs a SQL script file on the write connection inside one
    /// transaction.
    ///
    /// Callers are expected to hold the write lock; the writer's FIFO queue
    /// serializes the import against any in-flight write work either way.
    /// Returns the number of executed statements; the first failing
    /// statement rolls the whole run back.
    pub fn import_sql_file(&self, file_path: &str) -> PoolResult<usize> {
        let script = std::fs::read_to_string(file_path)?;
        let statements = import::split_statements(&script);
        let count = statements.len();

        let result = self
            .write
            .run_blocking(move |conn| import::run_script(conn, &statements))?;

        match &result {
            Ok(_) => info!(
                "event=import module=pool status=ok db={} commands={}",
                self.name, count
            ),
            Err(err) => error!(
                "event=import module=pool status=error db={} error={}",
                self.name, err
            ),
        }
        result
    }

    /// Closes every connection. Held or queued contexts become unreachable;
    /// pending work items are rejected deterministically.
    pub fn close_all(&self) {
        self.write.close();
        for reader in &self.readers {
            reader.close();
        }
        info!("event=pool_close module=pool status=ok db={}", self.name);
    }

    fn sched_guard(&self) -> MutexGuard<'_, SchedState> {
        self.sched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn all_connections(&self) -> impl Iterator<Item = &PooledConnection> {
        std::iter::once(&self.write).chain(self.readers.iter())
    }

    fn connection_for(&self, context_id: &str) -> Option<&PooledConnection> {
        self.all_connections()
            .find(|conn| conn.matches_lock(context_id))
    }

    fn require_all_vacant(&self) -> PoolResult<()> {
        let _sched = self.sched_guard();
        if self.all_connections().all(PooledConnection::is_vacant_lock) {
            Ok(())
        } else {
            Err(PoolError::ConnectionsLocked(self.name.clone()))
        }
    }

    fn run_literal_on(&self, conn: &PooledConnection, sql: &str) -> PoolResult<u64> {
        let sql = sql.to_owned();
        conn.run_blocking(move |c| exec::run_literal(c, &sql))?
            .map_err(PoolError::Sqlite)
    }

    fn notify_context_available(&self, context_id: &str) {
        debug!(
            "event=lock_grant module=pool db={} ctx={}",
            self.name, context_id
        );
        (self.on_context)(&self.name, context_id);
    }
}
