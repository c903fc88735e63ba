//! The notebook index.
//!
//! [`Index`] keeps a cache of all pages in a notebook store, the links
//! between them and the tags they carry, so UI-level operations (a tree
//! side pane, "what links here", tag filters) never scan the store.
//! The object exposes an API to trigger updates and to observe change
//! signals; higher-level views query the tables it maintains.
//!
//! Interactive changes (`on_store_page`, `on_delete_page`) are applied
//! immediately on the calling thread and pre-empt a running background
//! update, which releases the change lock between iterations exactly so
//! that they can.

mod core;
mod links;
mod pages;
mod schema;
mod signals;
mod tags;
mod tree;
mod worker;

pub use self::links::LinksIndexer;
pub use self::pages::{PagesIndexer, PagesReader};
pub use self::schema::{DB_VERSION, ROOT_ID};
pub use self::signals::{
    HandlerId, Signal, SignalEmitter, SignalHandler, SIGNAL_LINK_ADDED, SIGNAL_LINK_REMOVED,
    SIGNAL_PAGE_ADDED, SIGNAL_PAGE_CHANGED, SIGNAL_PAGE_NODE_CHANGED, SIGNAL_PAGE_REMOVED,
    SIGNAL_TAG_ADDED, SIGNAL_TAG_REMOVED,
};
pub use self::tags::TagsIndexer;

pub use self::core::IndexCore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db::{is_corruption, is_schema_error, ChangeContext, IndexDb};
use crate::error::{Error, Result};
use crate::layout::NotebookLayout;
use crate::model::{LinkRel, NeedsCheck, PageExists, PageName, PageRow};
use crate::parse::ParseTree;
use self::schema::{PROP_DB_VERSION, PROP_PROBABLY_UPTODATE};
use self::tree::TreeIndexer;
use self::worker::Worker;

/// A pluggable component reacting to page lifecycle events, maintaining
/// its own tables inside the same transaction.
///
/// Callbacks run in registration order; the pages sub-indexer is always
/// first because the others rely on the page row existing. Signals must
/// go through [`emitter`](Self::emitter) so they stay buffered until
/// the transaction commits.
pub trait SubIndexer: Send + Sync {
    /// Stable identifier; doubles as the metadata property key for
    /// plugin indexers.
    fn name(&self) -> &'static str;

    /// The signal registry and post-commit queue of this indexer.
    fn emitter(&self) -> &SignalEmitter;

    /// Plugin indexers return their database format version here; a
    /// change of the returned value triggers a full reindex when the
    /// plugin is attached.
    fn plugin_db_format(&self) -> Option<&'static str> {
        None
    }

    /// Create this indexer's tables; the previous state is gone.
    fn on_db_init(&self, core: &IndexCore, db: &Connection) -> Result<()>;

    /// A row transitioned out of `Uncertain`: the page now exists.
    fn on_new_page(&self, _core: &IndexCore, _db: &Connection, _page: &PageRow) -> Result<()> {
        Ok(())
    }

    /// Page content was (re)read; `None` means the file is gone.
    fn on_index_page(
        &self,
        _core: &IndexCore,
        _db: &Connection,
        _page: &PageRow,
        _tree: Option<&ParseTree>,
    ) -> Result<()> {
        Ok(())
    }

    /// The row is about to be removed or demoted to a placeholder.
    fn on_delete_page(&self, _core: &IndexCore, _db: &Connection, _page: &PageRow) -> Result<()> {
        Ok(())
    }

    /// The page is gone; addressed by parent and basename because the
    /// row no longer exists.
    fn on_deleted_page(
        &self,
        _core: &IndexCore,
        _db: &Connection,
        _parent: &PageName,
        _basename: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Deferred work at the end of the transaction, still inside it.
    fn before_commit(&self, _core: &IndexCore, _db: &Connection) -> Result<()> {
        Ok(())
    }

    /// The plugin is being removed; drop its tables.
    fn on_teardown(&self, _core: &IndexCore, _db: &Connection) -> Result<()> {
        Ok(())
    }
}

/// The index facade: owns the database and the sub-indexer list, and
/// runs the tree indexer in the foreground or on a worker thread.
pub struct Index {
    db: IndexDb,
    core: Arc<IndexCore>,
    links: Arc<LinksIndexer>,
    worker: Mutex<Option<Worker>>,
}

impl Index {
    /// Open or create a file-backed index for the given layout.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be created. A corrupt
    /// database file is deleted and rebuilt instead of failing.
    pub fn new_from_file(
        path: impl Into<PathBuf>,
        layout: Arc<dyn NotebookLayout>,
    ) -> Result<Self> {
        Self::new(IndexDb::open(path)?, layout)
    }

    /// Create an in-memory index for the given layout.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be created.
    pub fn new_from_memory(layout: Arc<dyn NotebookLayout>) -> Result<Self> {
        Self::new(IndexDb::open_in_memory()?, layout)
    }

    fn new(db: IndexDb, layout: Arc<dyn NotebookLayout>) -> Result<Self> {
        let pages = Arc::new(PagesIndexer::new());
        let links = Arc::new(LinksIndexer::new());
        let tags = Arc::new(TagsIndexer::new());
        let core = Arc::new(IndexCore::new(
            layout,
            vec![pages, links.clone(), tags],
        ));
        let index = Self {
            db,
            core,
            links,
            worker: Mutex::new(None),
        };
        index.init_db()?;
        Ok(index)
    }

    /// Probe the schema version and (re)build the schema as needed:
    /// version drift drops and recreates the tables, a corrupt
    /// file-backed database is deleted and recreated.
    fn init_db(&self) -> Result<()> {
        let ctx = self.db.change_context();
        let result = ctx.with(|conn| match self.core.get_property(conn, PROP_DB_VERSION) {
            Ok(Some(version)) if version == DB_VERSION => Ok(()),
            Ok(_) => {
                debug!("index db_version out of date");
                self.core.db_init(conn)
            }
            Err(err) if is_schema_error(&err) => {
                debug!("schema error, initializing index tables");
                self.core.db_init(conn)
            }
            Err(err) => Err(err),
        });

        match result {
            Ok(()) => Ok(()),
            Err(err) if is_corruption(&err) && self.db.is_file_backed() => {
                warn!("overwriting possibly corrupt index database");
                self.db.discard()?;
                let ctx = self.db.change_context();
                ctx.with(|conn| self.core.db_init(conn))
            }
            Err(err) => Err(err),
        }
    }

    /// Run a write closure, then deliver buffered signals on commit or
    /// drop them on rollback.
    fn with_change<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let ctx = self.db.change_context();
        match ctx.with(f) {
            Ok(value) => {
                self.core.after_commit();
                Ok(value)
            }
            Err(err) => {
                self.core.discard_queued();
                Err(err)
            }
        }
    }

    /// Run a read-only closure against the index database, under the
    /// state lock. This is the query surface index views build on.
    ///
    /// # Errors
    ///
    /// Propagates errors from the closure and the connection.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.db.read(f)
    }

    /// Look up one page record by name.
    ///
    /// # Errors
    ///
    /// [`Error::IndexNotFound`] when the page has no record.
    pub fn lookup_page(&self, name: &PageName) -> Result<PageRow> {
        self.db
            .read(|conn| self.core.pages.lookup_by_pagename(conn, name))
    }

    /// Whether no known divergence exists between store and index.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be read.
    pub fn probably_uptodate(&self) -> Result<bool> {
        self.db.read(|conn| {
            Ok(self
                .core
                .get_property(conn, PROP_PROBABLY_UPTODATE)?
                .is_some_and(|value| value != "0"))
        })
    }

    /// Update the index and return when done, committing once at the
    /// end. Faster than a background update, but holds the change lock
    /// for the duration. With a path, only that subtree is checked.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails; per-page errors are
    /// contained and logged instead.
    pub fn update(&self, path: Option<&PageName>) -> Result<()> {
        self.stop_update();
        let indexer = TreeIndexer::new(self.core.clone());
        info!("starting index update");
        self.with_change(|conn| {
            indexer.queue_check(conn, path)?;
            while indexer.step(conn)?.is_some() {}
            self.core.before_commit(conn)
        })
    }

    /// Like [`update`](Self::update), but yields after every checked
    /// page and commits between iterations, so changes become visible
    /// incrementally.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial queueing fails.
    pub fn update_iter(&self, path: Option<&PageName>) -> Result<UpdateIter> {
        self.stop_update();
        let indexer = TreeIndexer::new(self.core.clone());
        let ctx = self.db.change_context();
        ctx.with(|conn| indexer.queue_check(conn, path))?;
        Ok(UpdateIter {
            core: self.core.clone(),
            indexer,
            ctx,
            done: false,
        })
    }

    /// Start an update on the worker thread, unless one is already
    /// running. Each iteration commits separately.
    ///
    /// # Errors
    ///
    /// Returns an error when queueing fails or the thread cannot spawn.
    pub fn start_update(&self, path: Option<&PageName>) -> Result<()> {
        let indexer = TreeIndexer::new(self.core.clone());
        let ctx = self.db.change_context();
        ctx.with(|conn| indexer.queue_check(conn, path))?;

        let mut guard = self.worker.lock();
        if guard.as_ref().is_some_and(Worker::is_alive) {
            return Ok(());
        }
        *guard = Some(Worker::spawn(self.db.clone(), self.core.clone())?);
        Ok(())
    }

    /// Signal the worker to stop at its next iteration boundary and
    /// join it. Safe to call when none is running.
    pub fn stop_update(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop_and_join();
        }
    }

    /// Wait for the worker thread, with an optional timeout. Returns
    /// true iff the worker is still running afterwards.
    pub fn wait_for_update(&self, timeout: Option<Duration>) -> bool {
        let waiter = self.worker.lock().as_ref().map(Worker::waiter);
        let Some(waiter) = waiter else {
            return false;
        };
        let running = waiter.wait(timeout);
        if !running {
            let mut guard = self.worker.lock();
            if guard.as_ref().is_some_and(|worker| !worker.is_alive()) {
                *guard = None;
            }
        }
        running
    }

    /// Drop all index data and recreate the empty schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the rebuild fails.
    pub fn flush(&self) -> Result<()> {
        info!("flushing index");
        self.with_change(|conn| self.core.db_init(conn))
    }

    /// Index one page that was just stored, in a single transaction:
    /// touch or look up its row, read and index its content, and
    /// refresh the parent's children etag.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails; no partial state is
    /// left behind.
    pub fn on_store_page(&self, page: &PageName) -> Result<()> {
        self.with_change(|conn| {
            let row = match self.core.pages.lookup_by_pagename(conn, page) {
                Ok(row) => row,
                Err(err) if err.is_not_found() => self.core.touch_path(conn, page)?,
                Err(err) => return Err(err),
            };
            self.core.index_page(conn, &row)?;
            if !row.name.is_root() {
                let parent = self.core.pages.lookup_by_id(conn, row.parent)?;
                self.core.update_parent(conn, &parent)?;
            }
            self.core.before_commit(conn)
        })
    }

    /// Remove a page and its subtree from the index, bottom-up, with
    /// upward cleanup of parents that lost their last content.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails. An unknown path is
    /// a no-op.
    pub fn on_delete_page(&self, path: &PageName) -> Result<()> {
        self.with_change(|conn| {
            let row = match self.core.pages.lookup_by_pagename(conn, path) {
                Ok(row) => row,
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
            };

            for child in self.core.pages.walk_bottomup(conn, &row)? {
                match self.core.pages.lookup_by_id(conn, child.id) {
                    Ok(fresh) => {
                        self.core.delete_page(conn, &fresh, false)?;
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }

            let last_deleted = self.core.delete_page(conn, &row, true)?;
            match self.core.pages.lookup_by_id(conn, last_deleted.parent) {
                Ok(parent) => self.core.update_parent(conn, &parent)?,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            self.core.before_commit(conn)
        })
    }

    /// Handle a page move: drop the old subtree (unless the new name is
    /// the same or inside it) and re-index at the new location.
    ///
    /// # Errors
    ///
    /// Returns an error when either step fails.
    pub fn on_move_page(&self, old: &PageName, new: &PageName) -> Result<()> {
        if !(new == old || old.is_ancestor_of(new)) {
            self.on_delete_page(old)?;
        }
        self.update(Some(new))
    }

    /// Keep a placeholder alive for the page currently shown in the
    /// UI, via a synthetic link from the root row. Replaces any earlier
    /// current-page link and cleans up placeholders it kept alive.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails.
    pub fn touch_current_page_placeholder(&self, path: &PageName) -> Result<()> {
        self.with_change(|conn| {
            conn.execute("DELETE FROM links WHERE source=?1", [ROOT_ID])?;
            self.links.cleanup_placeholders(&self.core, conn)?;

            match self.core.pages.lookup_by_pagename(conn, path) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    let target = self.core.touch_path(conn, path)?;
                    conn.execute(
                        "INSERT INTO links (source, target, rel, names) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            ROOT_ID,
                            target.id,
                            LinkRel::Absolute.as_i64(),
                            path.as_str()
                        ],
                    )?;
                    self.core.set_page_exists(conn, &target, PageExists::AsLink)?;
                }
                Err(err) => return Err(err),
            }
            self.core.before_commit(conn)
        })
    }

    /// Flag all pages with content to be re-indexed, e.g. after
    /// attaching a plugin that wants to see every page.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails.
    pub fn flag_reindex(&self) -> Result<()> {
        self.with_change(|conn| self.core.flag_reindex(conn))
    }

    /// Attach a plugin sub-indexer. If its stored database format
    /// differs from [`SubIndexer::plugin_db_format`], its tables are
    /// (re)initialised and a full reindex is flagged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Consistency`] for indexers without a plugin
    /// format, or a database error.
    pub fn add_plugin_indexer(&self, indexer: Arc<dyn SubIndexer>) -> Result<()> {
        let format = indexer.plugin_db_format().ok_or_else(|| {
            Error::Consistency(format!(
                "indexer {} declares no plugin db format",
                indexer.name()
            ))
        })?;
        self.with_change(|conn| {
            if self.core.get_property(conn, indexer.name())?.as_deref() != Some(format) {
                indexer.on_db_init(&self.core, conn)?;
                self.core.set_property(conn, indexer.name(), Some(format))?;
                self.core.flag_reindex(conn)?;
            }
            Ok(())
        })?;
        self.core.add_indexer(indexer);
        Ok(())
    }

    /// Detach a plugin sub-indexer and drop its tables and property.
    ///
    /// # Errors
    ///
    /// Returns an error when the teardown transaction fails. An unknown
    /// name is a no-op.
    pub fn remove_plugin_indexer(&self, name: &str) -> Result<()> {
        let Some(indexer) = self.core.remove_indexer(name) else {
            return Ok(());
        };
        self.with_change(|conn| {
            indexer.on_teardown(&self.core, conn)?;
            self.core.set_property(conn, name, None)
        })
    }

    /// Connect a handler to a named signal, routed to the sub-indexer
    /// advertising it. Delivery happens post-commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSignal`] when no registered sub-indexer
    /// advertises the name.
    pub fn connect(
        &self,
        signal: &str,
        handler: impl Fn(&Signal) + Send + Sync + 'static,
    ) -> Result<HandlerId> {
        let handler: SignalHandler = Arc::new(handler);
        for indexer in self.core.indexers() {
            if indexer.emitter().supports(signal) {
                return indexer.emitter().connect(signal, handler);
            }
        }
        Err(Error::UnknownSignal(signal.to_string()))
    }

    /// Disconnect a handler by id, whichever sub-indexer holds it.
    pub fn disconnect(&self, id: HandlerId) {
        for indexer in self.core.indexers() {
            if indexer.emitter().disconnect(id) {
                return;
            }
        }
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.stop_update();
    }
}

/// Iterator returned by [`Index::update_iter`], committing between
/// iterations. Yields `(check kind, page name)` per checked page.
pub struct UpdateIter {
    core: Arc<IndexCore>,
    indexer: TreeIndexer,
    ctx: ChangeContext,
    done: bool,
}

impl Iterator for UpdateIter {
    type Item = Result<(NeedsCheck, PageName)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let core = &self.core;
        let indexer = &self.indexer;
        let step = self.ctx.with(|conn| match indexer.step(conn)? {
            Some(item) => {
                core.before_commit(conn)?;
                Ok(Some(item))
            }
            None => Ok(None),
        });
        match step {
            Ok(Some(item)) => {
                self.core.after_commit();
                Some(Ok(item))
            }
            Ok(None) => {
                self.core.after_commit();
                self.done = true;
                None
            }
            Err(err) => {
                self.core.discard_queued();
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
