//! Row-level operations shared by the index facade and the tree
//! indexer.
//!
//! Everything here runs inside a caller-provided write context; the
//! connection is passed down explicitly so nested helpers share the
//! surrounding transaction.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::index::pages::PagesReader;
use crate::index::schema::{self, PROP_PROBABLY_UPTODATE, REINDEX_ETAG};
use crate::index::SubIndexer;
use crate::layout::NotebookLayout;
use crate::model::{natural_sort_key, NeedsCheck, PageExists, PageName, PageRow};
use crate::parse::ParseTree;

/// Shared engine state: the storage layout and the ordered sub-indexer
/// list.
pub struct IndexCore {
    layout: Arc<dyn NotebookLayout>,
    indexers: RwLock<Vec<Arc<dyn SubIndexer>>>,
    pub(crate) pages: PagesReader,
}

impl IndexCore {
    pub(crate) fn new(
        layout: Arc<dyn NotebookLayout>,
        indexers: Vec<Arc<dyn SubIndexer>>,
    ) -> Self {
        Self {
            layout,
            indexers: RwLock::new(indexers),
            pages: PagesReader,
        }
    }

    pub(crate) fn layout(&self) -> &dyn NotebookLayout {
        self.layout.as_ref()
    }

    /// Snapshot of the sub-indexer list in registration order.
    pub(crate) fn indexers(&self) -> Vec<Arc<dyn SubIndexer>> {
        self.indexers.read().clone()
    }

    pub(crate) fn add_indexer(&self, indexer: Arc<dyn SubIndexer>) {
        self.indexers.write().push(indexer);
    }

    pub(crate) fn remove_indexer(&self, name: &str) -> Option<Arc<dyn SubIndexer>> {
        let mut indexers = self.indexers.write();
        let position = indexers.iter().position(|ix| ix.name() == name)?;
        Some(indexers.remove(position))
    }

    // ── Properties ───────────────────────────────────────────────

    pub(crate) fn get_property(&self, db: &Connection, key: &str) -> Result<Option<String>> {
        Ok(db
            .query_row("SELECT value FROM zim_index WHERE key=?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub(crate) fn set_property(
        &self,
        db: &Connection,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        db.execute("DELETE FROM zim_index WHERE key=?1", [key])?;
        if let Some(value) = value {
            db.execute(
                "INSERT INTO zim_index (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
        }
        Ok(())
    }

    /// Drop all tables and rebuild an empty schema, delegating each
    /// sub-indexer's tables to its `on_db_init`.
    pub(crate) fn db_init(&self, db: &Connection) -> Result<()> {
        debug!("(re-)initializing database for index");
        schema::drop_all_tables(db)?;
        schema::init_metadata(db)?;
        for indexer in self.indexers() {
            indexer.on_db_init(self, db)?;
        }
        Ok(())
    }

    /// Flag every content-bearing page for re-indexing.
    pub(crate) fn flag_reindex(&self, db: &Connection) -> Result<()> {
        self.set_property(db, PROP_PROBABLY_UPTODATE, Some("0"))?;
        db.execute(
            "UPDATE pages SET content_etag=?1, needscheck=?2 WHERE content_etag IS NOT NULL",
            rusqlite::params![REINDEX_ETAG, NeedsCheck::CheckPage.as_i64()],
        )?;
        Ok(())
    }

    // ── Row primitives ───────────────────────────────────────────

    /// Create a row for a page. The page does not really exist until
    /// [`set_page_exists`](Self::set_page_exists) is called.
    pub(crate) fn insert_page(
        &self,
        db: &Connection,
        parent: &PageRow,
        basename: &str,
        needscheck: NeedsCheck,
    ) -> Result<PageRow> {
        db.execute(
            "INSERT INTO pages (parent, basename, sortkey, needscheck) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                parent.id,
                basename,
                natural_sort_key(basename),
                needscheck.as_i64()
            ],
        )?;
        db.execute(
            "UPDATE pages SET n_children = n_children + 1 WHERE id=?1",
            [parent.id],
        )?;
        self.pages.lookup_by_parent(db, parent, basename)
    }

    /// Promote a page's existence level, promoting every ancestor
    /// first (top-down) so existence stays monotone up the tree. Fires
    /// `on_new_page` for every row leaving `Uncertain`.
    pub(crate) fn set_page_exists(
        &self,
        db: &Connection,
        page: &PageRow,
        level: PageExists,
    ) -> Result<()> {
        debug_assert!(matches!(
            level,
            PageExists::AsLink | PageExists::HasContent
        ));
        for ancestor in page.name.ancestors_top_down() {
            let row = self.pages.lookup_by_pagename(db, &ancestor)?;
            if row.page_exists < level {
                self.write_page_exists(db, &row, level)?;
            }
        }
        self.write_page_exists(db, page, level)
    }

    fn write_page_exists(&self, db: &Connection, page: &PageRow, level: PageExists) -> Result<()> {
        let was_uncertain = page.page_exists == PageExists::Uncertain;
        db.execute(
            "UPDATE pages SET page_exists=?1 WHERE id=?2",
            rusqlite::params![level.as_i64(), page.id],
        )?;
        if was_uncertain && !page.is_root() {
            let mut updated = page.clone();
            updated.page_exists = level;
            for indexer in self.indexers() {
                indexer.on_new_page(self, db, &updated)?;
            }
        }
        Ok(())
    }

    /// Ensure a chain of rows exists down to `path`, creating missing
    /// ones as `UpToDate`/`Uncertain`, and return the leaf.
    pub(crate) fn touch_path(&self, db: &Connection, path: &PageName) -> Result<PageRow> {
        let mut current = self.pages.root(db)?;
        let parts: Vec<&str> = path.parts().collect();
        let mut index = 0;

        while index < parts.len() {
            match self.pages.try_lookup_by_parent(db, &current, parts[index])? {
                Some(row) => {
                    current = row;
                    index += 1;
                }
                None => break,
            }
        }
        while index < parts.len() {
            let parent = current.clone();
            current = self.insert_page(db, &parent, parts[index], NeedsCheck::UpToDate)?;
            index += 1;
        }
        Ok(current)
    }

    /// Read and index the page content behind `page`.
    ///
    /// The etag is taken before the content is read, so a change racing
    /// the read leaves a stale etag behind for the next check to catch.
    /// A file that vanished is indexed as absent content; the row is
    /// left for the next children reconciliation to delete.
    pub(crate) fn index_page(&self, db: &Connection, page: &PageRow) -> Result<()> {
        let backing = self.layout.map_page(&page.name);
        let content = match backing.file {
            Some(_) => self.layout.read_page(&page.name)?,
            None => None,
        };

        if let (Some(stat), Some(text)) = (backing.file, content) {
            if page.page_exists != PageExists::HasContent {
                self.set_page_exists(db, page, PageExists::HasContent)?;
            }
            let tree = match self.layout.format().parse(&text) {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(page = %page.name, error = %err, "failed to parse page, indexing as empty");
                    ParseTree::default()
                }
            };
            let mut updated = page.clone();
            updated.page_exists = PageExists::HasContent;
            for indexer in self.indexers() {
                indexer.on_index_page(self, db, &updated, Some(&tree))?;
            }
            db.execute(
                "UPDATE pages SET content_etag=?1, ctime=?2, mtime=?3 WHERE id=?4",
                rusqlite::params![stat.etag(), stat.ctime, stat.mtime, page.id],
            )?;
        } else {
            for indexer in self.indexers() {
                indexer.on_index_page(self, db, page, None)?;
            }
            db.execute(
                "UPDATE pages SET content_etag=NULL, ctime=NULL, mtime=NULL WHERE id=?1",
                [page.id],
            )?;
        }
        Ok(())
    }

    /// Delete a page record, or demote it to a placeholder when child
    /// rows still hang below it. With `cleanup` the deletion recurses
    /// upward through parents that lost their last content.
    ///
    /// Returns the highest row that was deleted.
    ///
    /// # Errors
    ///
    /// [`Error::Consistency`] when called on the root or on a page
    /// whose children are not all placeholders; delete those first.
    pub(crate) fn delete_page(
        &self,
        db: &Connection,
        page: &PageRow,
        cleanup: bool,
    ) -> Result<PageRow> {
        if page.is_root() {
            return Err(Error::Consistency("cannot delete the root page".into()));
        }

        let child_levels: Vec<i64> = db
            .prepare("SELECT page_exists FROM pages WHERE parent=?1")?
            .query_map([page.id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        if child_levels
            .iter()
            .any(|level| *level != PageExists::AsLink.as_i64())
        {
            return Err(Error::Consistency(format!(
                "cannot delete page with populated children: {}",
                page.name
            )));
        }

        for indexer in self.indexers() {
            indexer.on_delete_page(self, db, page)?;
        }

        if child_levels.is_empty() {
            db.execute("DELETE FROM pages WHERE id=?1", [page.id])?;
            db.execute(
                "UPDATE pages SET n_children = n_children - 1 WHERE id=?1",
                [page.parent],
            )?;
        } else {
            db.execute(
                "UPDATE pages SET page_exists=?1, content_etag=NULL, children_etag=NULL, \
                 ctime=NULL, mtime=NULL WHERE id=?2",
                rusqlite::params![PageExists::AsLink.as_i64(), page.id],
            )?;
        }

        let parent_name = page.name.parent();
        for indexer in self.indexers() {
            indexer.on_deleted_page(self, db, &parent_name, page.basename())?;
        }

        if cleanup && !parent_name.is_root() {
            // The parent may already be gone through placeholder cleanup.
            match self.pages.lookup_by_pagename(db, &parent_name) {
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
                Ok(parent) => {
                    if !self.check_existence(db, &parent)? {
                        return self.delete_page(db, &parent, true);
                    }
                }
            }
        }

        Ok(page.clone())
    }

    /// True iff the page has content of its own or at least one
    /// content-bearing child. Monotonicity makes the direct-children
    /// check cover deeper descendants.
    ///
    /// Own content is judged by the content etag, not by `page_exists`:
    /// ancestors get promoted to `HasContent` without a backing file,
    /// and those must not block upward cleanup.
    pub(crate) fn check_existence(&self, db: &Connection, page: &PageRow) -> Result<bool> {
        if page.content_etag.is_some() {
            return Ok(true);
        }
        let count: i64 = db.query_row(
            "SELECT count(*) FROM pages WHERE parent=?1 AND page_exists=?2",
            rusqlite::params![page.id, PageExists::HasContent.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// After an externally driven insert or delete: refresh the
    /// children etag if the database already matches the store listing,
    /// else leave the record stale for the tree indexer to reconcile.
    pub(crate) fn update_parent(&self, db: &Connection, parent: &PageRow) -> Result<()> {
        let backing = self.layout.map_page(&parent.name);
        let etag = backing.folder.map(|stat| stat.etag());
        if self.check_pagelist(db, parent)? {
            db.execute(
                "UPDATE pages SET children_etag=?1 WHERE id=?2",
                rusqlite::params![etag, parent.id],
            )?;
        }
        Ok(())
    }

    /// True iff the store listing under `page` matches the non-placeholder
    /// child rows, checked by removing each row's basename from the
    /// listed set: a row the store does not list fails immediately,
    /// and names left over at the end fail too.
    pub(crate) fn check_pagelist(&self, db: &Connection, page: &PageRow) -> Result<bool> {
        let mut names: HashSet<String> = self
            .layout
            .list_children(&page.name)?
            .iter()
            .map(|child| child.basename().to_string())
            .collect();

        let basenames: Vec<String> = db
            .prepare("SELECT basename FROM pages WHERE parent=?1 AND page_exists<>?2")?
            .query_map(
                rusqlite::params![page.id, PageExists::AsLink.as_i64()],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<_>>()?;

        for basename in basenames {
            if !names.remove(&basename) {
                return Ok(false);
            }
        }
        Ok(names.is_empty())
    }

    // ── Transaction hooks ────────────────────────────────────────

    /// Run sub-indexer deferred work (link resolution, placeholder
    /// cleanup) while still inside the write transaction.
    pub(crate) fn before_commit(&self, db: &Connection) -> Result<()> {
        for indexer in self.indexers() {
            indexer.before_commit(self, db)?;
        }
        Ok(())
    }

    /// Deliver the signals buffered during the transaction.
    pub(crate) fn after_commit(&self) {
        for indexer in self.indexers() {
            indexer.emitter().emit_queued();
        }
    }

    /// Drop buffered signals after a rollback.
    pub(crate) fn discard_queued(&self) {
        for indexer in self.indexers() {
            indexer.emitter().discard_queued();
        }
    }
}
