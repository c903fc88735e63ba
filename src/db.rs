//! Connection management for the index database.
//!
//! Access is protected by two locks. The *state lock* is held while
//! reading: as long as you hold it, no committed change appears under
//! you. The *change lock* is held while a write transaction is open and
//! serialises writers. Commit acquires the state lock momentarily so
//! publication of a transaction is atomic with respect to readers.
//!
//! Two modes:
//!
//! - **In-memory**: a single shared connection behind a re-entrant
//!   mutex that serves as both locks, so changes are visible to readers
//!   immediately.
//! - **File-backed**: every thread lazily opens its own connection.
//!   Uncommitted writes in one thread are invisible to the others until
//!   commit, which gives interactive readers a consistent, if slightly
//!   stale, view while a long update runs.
//!
//! Writes go through a [`ChangeContext`], which is re-entrant through an
//! explicit depth counter: nested [`ChangeContext::with`] calls on the
//! same handle share one transaction, and only the outermost exit
//! commits (or rolls back, when the closure returned an error).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rusqlite::Connection;
use tracing::warn;

use crate::error::{Error, Result};

thread_local! {
    /// Per-thread connection cache for file-backed databases, keyed by
    /// manager id. The generation stamp invalidates connections after
    /// the database file was discarded.
    static CONNECTIONS: RefCell<HashMap<u64, (u64, Rc<Connection>)>> =
        RefCell::new(HashMap::new());
}

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    // Frequent commits are cheap this way; crash recovery is a rescan.
    conn.pragma_update(None, "synchronous", "OFF")?;
    Ok(())
}

fn total_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}

#[derive(Debug)]
struct FileDb {
    id: u64,
    path: PathBuf,
    generation: AtomicU64,
    change_lock: Mutex<()>,
    state_lock: RwLock<()>,
}

impl FileDb {
    fn thread_conn(&self) -> Result<Rc<Connection>> {
        CONNECTIONS.with(|cache| {
            let mut cache = cache.borrow_mut();
            let generation = self.generation.load(Ordering::Acquire);
            if let Some((cached_generation, conn)) = cache.get(&self.id) {
                if *cached_generation == generation {
                    return Ok(conn.clone());
                }
            }
            let conn = Connection::open(&self.path)?;
            configure(&conn)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            let conn = Rc::new(conn);
            cache.insert(self.id, (generation, conn.clone()));
            Ok(conn)
        })
    }
}

#[derive(Debug, Clone)]
enum Inner {
    Memory(Arc<ReentrantMutex<Connection>>),
    File(Arc<FileDb>),
}

/// Handle to the index database, cheap to clone and share across
/// threads.
#[derive(Debug, Clone)]
pub struct IndexDb {
    inner: Inner,
}

impl IndexDb {
    /// Open an in-memory database with one shared connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            inner: Inner::Memory(Arc::new(ReentrantMutex::new(conn))),
        })
    }

    /// Open a file-backed database, creating parent directories as
    /// needed. Each calling thread gets its own connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the database cannot be
    /// created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Connections open lazily per thread; a corrupt file surfaces
        // on first use, where the index can recover by discarding it.
        Ok(Self {
            inner: Inner::File(Arc::new(FileDb {
                id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
                path,
                generation: AtomicU64::new(0),
                change_lock: Mutex::new(()),
                state_lock: RwLock::new(()),
            })),
        })
    }

    /// True for file-backed databases, which support discard/rebuild.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        matches!(self.inner, Inner::File(_))
    }

    /// The database file path, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.inner {
            Inner::Memory(_) => None,
            Inner::File(file) => Some(&file.path),
        }
    }

    /// Run a read-only closure under the state lock.
    ///
    /// Debug builds assert that the closure did not write; a read
    /// context that mutates the database is a bug.
    ///
    /// # Errors
    ///
    /// Propagates errors from the closure and the connection.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        match &self.inner {
            Inner::Memory(shared) => {
                let conn = shared.lock();
                let before = total_changes(&conn)?;
                let result = f(&conn);
                debug_assert_eq!(
                    before,
                    total_changes(&conn)?,
                    "unexpected changes to the database in a read context"
                );
                result
            }
            Inner::File(file) => {
                let conn = file.thread_conn()?;
                let _state = file.state_lock.read();
                let before = total_changes(&conn)?;
                let result = f(&conn);
                debug_assert_eq!(
                    before,
                    total_changes(&conn)?,
                    "unexpected changes to the database in a read context"
                );
                result
            }
        }
    }

    /// Create a write context handle for the calling thread.
    ///
    /// Nested writes must share one handle; two handles nested on the
    /// same thread would deadlock on the change lock.
    #[must_use]
    pub fn change_context(&self) -> ChangeContext {
        ChangeContext {
            inner: self.inner.clone(),
            depth: Cell::new(0),
        }
    }

    /// Close this thread's connection and delete the database file,
    /// invalidating connections cached by other threads. Used to
    /// recover from a corrupt database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Consistency`] for in-memory databases, or the
    /// I/O error from removing the file.
    pub fn discard(&self) -> Result<()> {
        match &self.inner {
            Inner::Memory(_) => Err(Error::Consistency(
                "cannot discard an in-memory database".into(),
            )),
            Inner::File(file) => {
                warn!(path = %file.path.display(), "discarding index database");
                file.generation.fetch_add(1, Ordering::AcqRel);
                CONNECTIONS.with(|cache| {
                    cache.borrow_mut().remove(&file.id);
                });
                for suffix in ["", "-wal", "-shm"] {
                    let mut path = file.path.clone().into_os_string();
                    path.push(suffix);
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(())
            }
        }
    }
}

/// Re-entrant write context over the index database.
///
/// Not `Send`: a context belongs to the thread that created it, the
/// same way its file-mode connection does.
pub struct ChangeContext {
    inner: Inner,
    depth: Cell<u32>,
}

impl ChangeContext {
    /// Run a write closure inside the shared transaction.
    ///
    /// At depth zero this acquires the change lock, opens a
    /// transaction, and on exit commits under the state lock (or rolls
    /// back if the closure erred). Nested calls on the same handle just
    /// run the closure inside the already-open transaction.
    ///
    /// # Errors
    ///
    /// Propagates errors from the closure, the transaction bookkeeping,
    /// and the connection.
    pub fn with<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        match &self.inner {
            Inner::Memory(shared) => {
                let conn = shared.lock();
                self.transact(&conn, None, f)
            }
            Inner::File(file) => {
                let conn = file.thread_conn()?;
                if self.depth.get() == 0 {
                    let _change = file.change_lock.lock();
                    self.transact(&conn, Some(&file.state_lock), f)
                } else {
                    self.transact(&conn, Some(&file.state_lock), f)
                }
            }
        }
    }

    fn transact<R>(
        &self,
        conn: &Connection,
        publish: Option<&RwLock<()>>,
        f: impl FnOnce(&Connection) -> Result<R>,
    ) -> Result<R> {
        let outermost = self.depth.get() == 0;
        if outermost {
            conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        self.depth.set(self.depth.get() + 1);
        let result = f(conn);
        self.depth.set(self.depth.get() - 1);
        if outermost {
            if result.is_ok() {
                let _state = publish.map(RwLock::write);
                conn.execute_batch("COMMIT")?;
            } else if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback failed");
            }
        }
        result
    }
}

/// True when the database file itself is unreadable and a
/// discard/rebuild is the only way forward.
pub(crate) fn is_corruption(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            )
    )
}

/// True for plain SQL-level failures such as a missing table, the
/// signature of a database holding another schema version.
pub(crate) fn is_schema_error(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::Unknown
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(db: &IndexDb) {
        let ctx = db.change_context();
        ctx.with(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
            Ok(())
        })
        .unwrap();
    }

    fn count(db: &IndexDb) -> i64 {
        db.read(|conn| Ok(conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_write_then_read_memory() {
        let db = IndexDb::open_in_memory().unwrap();
        setup(&db);
        let ctx = db.change_context();
        ctx.with(|conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_nested_with_shares_one_transaction() {
        let db = IndexDb::open_in_memory().unwrap();
        setup(&db);
        let ctx = db.change_context();
        ctx.with(|conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            ctx.with(|conn| {
                conn.execute("INSERT INTO t (v) VALUES (2)", [])?;
                Ok(())
            })?;
            // Still inside the outer transaction after the nested exit.
            let n: i64 = conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))?;
            assert_eq!(n, 2);
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_error_rolls_back() {
        let db = IndexDb::open_in_memory().unwrap();
        setup(&db);
        let ctx = db.change_context();
        let result: Result<()> = ctx.with(|conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Err(Error::Consistency("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_file_mode_committed_only_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let db = IndexDb::open(dir.path().join("index.db")).unwrap();
        setup(&db);

        let ctx = db.change_context();
        ctx.with(|conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            // A reader on another thread must not see the uncommitted row.
            let db2 = db.clone();
            let seen = std::thread::spawn(move || count(&db2)).join().unwrap();
            assert_eq!(seen, 0);
            Ok(())
        })
        .unwrap();

        let db2 = db.clone();
        let seen = std::thread::spawn(move || count(&db2)).join().unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_discard_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = IndexDb::open(dir.path().join("index.db")).unwrap();
        setup(&db);
        db.discard().unwrap();

        let tables: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_discard_refused_in_memory() {
        let db = IndexDb::open_in_memory().unwrap();
        assert!(db.discard().is_err());
    }
}
