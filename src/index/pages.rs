//! Pages sub-indexer and the internal page lookup API.
//!
//! The pages sub-indexer owns the canonical `pages` table. It is always
//! registered first: every other sub-indexer depends on the page row
//! existing when its callbacks fire.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::index::core::IndexCore;
use crate::index::schema::ROOT_ID;
use crate::index::signals::{
    SignalEmitter, SIGNAL_PAGE_ADDED, SIGNAL_PAGE_CHANGED, SIGNAL_PAGE_NODE_CHANGED,
    SIGNAL_PAGE_REMOVED,
};
use crate::index::SubIndexer;
use crate::model::{NeedsCheck, PageExists, PageName, PageRow};
use crate::parse::ParseTree;

const PAGES_SIGNALS: &[&str] = &[
    SIGNAL_PAGE_ADDED,
    SIGNAL_PAGE_CHANGED,
    SIGNAL_PAGE_NODE_CHANGED,
    SIGNAL_PAGE_REMOVED,
];

/// `AUTOINCREMENT` keeps row ids monotonic even across deletes, which
/// the work queue relies on: within one priority, ordering by id visits
/// parents before children.
const PAGES_TABLE_SQL: &str = "
CREATE TABLE pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent INTEGER NOT NULL DEFAULT 0,
    basename TEXT NOT NULL,
    sortkey TEXT NOT NULL,
    page_exists INTEGER NOT NULL DEFAULT 0,
    content_etag TEXT,
    children_etag TEXT,
    ctime TIMESTAMP,
    mtime TIMESTAMP,
    n_children INTEGER NOT NULL DEFAULT 0,
    needscheck INTEGER NOT NULL DEFAULT 0,
    childseen INTEGER NOT NULL DEFAULT 1,
    CONSTRAINT uc_PagesOnce UNIQUE (parent, basename)
);
CREATE INDEX idx_pages_needscheck ON pages(needscheck, id);
INSERT INTO pages (parent, basename, sortkey, page_exists)
VALUES (0, '', '', 2);
";

const PAGE_COLUMNS: &str = "id, parent, basename, page_exists, content_etag, \
                            children_etag, ctime, mtime, n_children, needscheck";

fn map_page_row(name: PageName, row: &Row<'_>) -> rusqlite::Result<PageRow> {
    Ok(PageRow {
        id: row.get(0)?,
        parent: row.get(1)?,
        name,
        page_exists: PageExists::from_i64(row.get(3)?),
        content_etag: row.get(4)?,
        children_etag: row.get(5)?,
        ctime: row.get(6)?,
        mtime: row.get(7)?,
        n_children: row.get(8)?,
        needscheck: NeedsCheck::from_i64(row.get(9)?),
    })
}

/// Read-side lookups over the `pages` table.
///
/// All methods take the connection of the surrounding read or write
/// context; the reader itself carries no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct PagesReader;

impl PagesReader {
    /// The root row. Its absence means the schema is gone.
    pub fn root(&self, db: &Connection) -> Result<PageRow> {
        db.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id=?1"),
            [ROOT_ID],
            |row| map_page_row(PageName::root(), row),
        )
        .optional()?
        .ok_or_else(|| Error::Consistency("root page row is missing".into()))
    }

    pub(crate) fn try_lookup_by_parent(
        &self,
        db: &Connection,
        parent: &PageRow,
        basename: &str,
    ) -> Result<Option<PageRow>> {
        Ok(db
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE parent=?1 AND basename=?2"),
                rusqlite::params![parent.id, basename],
                |row| map_page_row(parent.name.child(basename), row),
            )
            .optional()?)
    }

    /// Child of `parent` by basename.
    ///
    /// # Errors
    ///
    /// [`Error::IndexNotFound`] when no such row exists.
    pub fn lookup_by_parent(
        &self,
        db: &Connection,
        parent: &PageRow,
        basename: &str,
    ) -> Result<PageRow> {
        self.try_lookup_by_parent(db, parent, basename)?
            .ok_or_else(|| Error::not_found(parent.name.child(basename).as_str()))
    }

    /// Walk the name from the root down to the addressed row.
    ///
    /// # Errors
    ///
    /// [`Error::IndexNotFound`] when any segment is missing.
    pub fn lookup_by_pagename(&self, db: &Connection, name: &PageName) -> Result<PageRow> {
        let mut current = self.root(db)?;
        for part in name.parts() {
            current = self
                .try_lookup_by_parent(db, &current, part)?
                .ok_or_else(|| Error::not_found(name.as_str()))?;
        }
        Ok(current)
    }

    /// Fetch a row by id, reconstructing its full name by walking the
    /// parent chain.
    ///
    /// # Errors
    ///
    /// [`Error::IndexNotFound`] when the id (or an ancestor) is gone.
    pub fn lookup_by_id(&self, db: &Connection, id: i64) -> Result<PageRow> {
        if id == ROOT_ID {
            return self.root(db);
        }
        let mut parts: Vec<String> = Vec::new();
        let mut current = id;
        while current != ROOT_ID {
            let entry: Option<(i64, String)> = db
                .query_row(
                    "SELECT parent, basename FROM pages WHERE id=?1",
                    [current],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((parent, basename)) = entry else {
                return Err(Error::not_found(format!("page id {id}")));
            };
            parts.push(basename);
            current = parent;
        }
        parts.reverse();
        let name = PageName::new(&parts.join(":"));
        db.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id=?1"),
            [id],
            |row| map_page_row(name, row),
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("page id {id}")))
    }

    /// All direct child rows, placeholders included, in natural order.
    pub fn children(&self, db: &Connection, parent: &PageRow) -> Result<Vec<PageRow>> {
        let mut stmt = db.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE parent=?1 ORDER BY sortkey, basename"
        ))?;
        let rows = stmt.query_map([parent.id], |row| {
            let basename: String = row.get(2)?;
            map_page_row(parent.name.child(&basename), row)
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// All descendants of `root` in bottom-up (post-)order, so children
    /// always precede their parents. `root` itself is not included.
    pub fn walk_bottomup(&self, db: &Connection, root: &PageRow) -> Result<Vec<PageRow>> {
        let mut result = Vec::new();
        self.walk_into(db, root, &mut result)?;
        Ok(result)
    }

    fn walk_into(&self, db: &Connection, page: &PageRow, out: &mut Vec<PageRow>) -> Result<()> {
        for child in self.children(db, page)? {
            self.walk_into(db, &child, out)?;
            out.push(child);
        }
        Ok(())
    }
}

/// Maintains the `pages` table and emits the page lifecycle signals.
pub struct PagesIndexer {
    emitter: SignalEmitter,
}

impl PagesIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitter: SignalEmitter::new(PAGES_SIGNALS),
        }
    }
}

impl Default for PagesIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubIndexer for PagesIndexer {
    fn name(&self) -> &'static str {
        "pages"
    }

    fn emitter(&self) -> &SignalEmitter {
        &self.emitter
    }

    fn on_db_init(&self, _core: &IndexCore, db: &Connection) -> Result<()> {
        db.execute_batch(PAGES_TABLE_SQL)?;
        Ok(())
    }

    fn on_new_page(&self, _core: &IndexCore, _db: &Connection, page: &PageRow) -> Result<()> {
        self.emitter
            .queue(SIGNAL_PAGE_ADDED, page.name.clone(), None);
        let parent = page.name.parent();
        if !parent.is_root() {
            self.emitter.queue(SIGNAL_PAGE_NODE_CHANGED, parent, None);
        }
        Ok(())
    }

    fn on_index_page(
        &self,
        _core: &IndexCore,
        _db: &Connection,
        page: &PageRow,
        _tree: Option<&ParseTree>,
    ) -> Result<()> {
        self.emitter
            .queue(SIGNAL_PAGE_CHANGED, page.name.clone(), None);
        Ok(())
    }

    fn on_deleted_page(
        &self,
        _core: &IndexCore,
        _db: &Connection,
        parent: &PageName,
        basename: &str,
    ) -> Result<()> {
        self.emitter
            .queue(SIGNAL_PAGE_REMOVED, parent.child(basename), None);
        if !parent.is_root() {
            self.emitter
                .queue(SIGNAL_PAGE_NODE_CHANGED, parent.clone(), None);
        }
        Ok(())
    }
}
