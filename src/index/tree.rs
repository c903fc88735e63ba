//! The tree indexer state machine.
//!
//! Works off the `needscheck` column as a priority queue:
//!
//! ```text
//!  queue
//!    |
//!    |--> CHECK_TREE
//!    |       |    compare children etag
//!    |       |     add / remove children
//!    |       |      recurse into all children
//!    |       v
//!    |--> CHECK_PAGE
//!    |       | |  compare content etag, index content
//!    |       | |   compare children etag
//!    |       | v
//!    `--> CHECK_CHILDREN
//!            | |  compare children etag
//!            | |   touch only changed children, no recursion
//!            v v
//!          UPTODATE
//! ```
//!
//! Structural checks rank above content checks, so a scan walks the
//! whole tree shape before it starts reading pages and the hierarchy
//! shows up early. Within one rank, ordering by row id visits parents
//! before their children.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::index::core::IndexCore;
use crate::index::schema::PROP_PROBABLY_UPTODATE;
use crate::layout::PageBacking;
use crate::model::{NeedsCheck, PageExists, PageName, PageRow};

/// Drives the check queue over the `pages` table.
pub struct TreeIndexer {
    core: Arc<IndexCore>,
}

impl TreeIndexer {
    pub(crate) fn new(core: Arc<IndexCore>) -> Self {
        Self { core }
    }

    /// Flag a page for a recursive tree check, walking up to the
    /// closest existing row (or the root) first. No path means the
    /// whole tree.
    pub(crate) fn queue_check(&self, db: &Connection, path: Option<&PageName>) -> Result<()> {
        let mut name = path.cloned().unwrap_or_else(PageName::root);
        let row = loop {
            if name.is_root() {
                break self.core.pages.root(db)?;
            }
            match self.core.pages.lookup_by_pagename(db, &name) {
                Ok(row) => break row,
                Err(err) if err.is_not_found() => name = name.parent(),
                Err(err) => return Err(err),
            }
        };
        db.execute(
            "UPDATE pages SET needscheck=?1 WHERE id=?2",
            rusqlite::params![NeedsCheck::CheckTree.as_i64(), row.id],
        )?;
        Ok(())
    }

    /// Run one iteration: pick the highest-priority flagged page,
    /// dispatch its check, and report what was done. `None` means the
    /// queue drained; `probably_uptodate` has been set.
    ///
    /// A failing dispatch marks that page up to date and is only
    /// logged, so one pathological page cannot wedge the whole update.
    pub(crate) fn step(&self, db: &Connection) -> Result<Option<(NeedsCheck, PageName)>> {
        let next: Option<(i64, i64)> = db
            .query_row(
                "SELECT id, needscheck FROM pages WHERE needscheck > 0 \
                 ORDER BY needscheck, id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, check)) = next else {
            self.core
                .set_property(db, PROP_PROBABLY_UPTODATE, Some("1"))?;
            debug!("index update finished");
            return Ok(None);
        };

        let check = NeedsCheck::from_i64(check);
        let page = self.core.pages.lookup_by_id(db, id)?;
        if let Err(err) = self.dispatch(db, check, &page) {
            // Mark the page done anyway, else we would loop on it.
            error!(page = %page.name, error = %err, "error while handling update for page");
            db.execute(
                "UPDATE pages SET needscheck=?1 WHERE id=?2",
                rusqlite::params![NeedsCheck::UpToDate.as_i64(), id],
            )?;
        }
        Ok(Some((check, page.name)))
    }

    fn dispatch(&self, db: &Connection, check: NeedsCheck, page: &PageRow) -> Result<()> {
        match check {
            NeedsCheck::CheckTree => self.check_children(db, page, true),
            NeedsCheck::CheckChildren => self.check_children(db, page, false),
            NeedsCheck::CheckPage => self.check_page(db, page),
            other => Err(Error::Consistency(format!(
                "unknown update flag: {other:?}"
            ))),
        }
    }

    /// Compare the stored children etag against the store and reconcile
    /// the child rows. With `checktree` the check recurses into the
    /// children even when the etag is unchanged, because a grand-child
    /// change does not bump this folder's mtime.
    fn check_children(&self, db: &Connection, page: &PageRow, checktree: bool) -> Result<()> {
        let backing = self.core.layout().map_page(&page.name);
        let etag = backing.folder.map(|stat| stat.etag());

        if etag != page.children_etag {
            self.core
                .set_property(db, PROP_PROBABLY_UPTODATE, Some("0"))?;
            if etag.is_some() && page.n_children == 0 {
                self.new_children(db, page)?;
            } else if etag.is_some() {
                self.update_children(db, page, checktree)?;
            } else {
                self.delete_children(db, page)?;
            }
        } else if checktree {
            for child_name in self.core.layout().list_children(&page.name)? {
                let Some(row) = self
                    .core
                    .pages
                    .try_lookup_by_parent(db, page, child_name.basename())?
                else {
                    return Err(Error::Consistency(format!(
                        "missing index row for: {child_name}"
                    )));
                };
                let child_backing = self.core.layout().map_page(&child_name);
                let check = if child_backing.folder.is_some() || row.n_children > 0 {
                    NeedsCheck::CheckTree
                } else {
                    NeedsCheck::CheckPage
                };
                db.execute(
                    "UPDATE pages SET needscheck=?1 WHERE id=?2",
                    rusqlite::params![check.as_i64(), row.id],
                )?;
            }
        }

        let needscheck = if checktree && !page.is_root() {
            NeedsCheck::CheckPage
        } else {
            NeedsCheck::UpToDate
        };
        db.execute(
            "UPDATE pages SET children_etag=?1, needscheck=?2 WHERE id=?3",
            rusqlite::params![etag, needscheck.as_i64(), page.id],
        )?;
        Ok(())
    }

    /// First children for a page that had none: insert every listed
    /// child and schedule its own check.
    fn new_children(&self, db: &Connection, page: &PageRow) -> Result<()> {
        debug_assert_eq!(page.n_children, 0);
        for child_name in self.core.layout().list_children(&page.name)? {
            let backing = self.core.layout().map_page(&child_name);
            let child =
                self.core
                    .insert_page(db, page, child_name.basename(), child_check(&backing))?;
            if backing.file.is_some() {
                self.core
                    .set_page_exists(db, &child, PageExists::HasContent)?;
            }
        }
        Ok(())
    }

    /// Reconcile existing child rows against the store listing. Rows
    /// are flagged `childseen=0` up front; whatever is still flagged
    /// after the walk vanished from the store and gets deleted.
    fn update_children(&self, db: &Connection, page: &PageRow, checktree: bool) -> Result<()> {
        db.execute(
            "UPDATE pages SET childseen=0 WHERE parent=?1 AND page_exists<>?2",
            rusqlite::params![page.id, PageExists::AsLink.as_i64()],
        )?;

        for child_name in self.core.layout().list_children(&page.name)? {
            let backing = self.core.layout().map_page(&child_name);
            match self
                .core
                .pages
                .try_lookup_by_parent(db, page, child_name.basename())?
            {
                None => {
                    let child = self.core.insert_page(
                        db,
                        page,
                        child_name.basename(),
                        child_check(&backing),
                    )?;
                    if backing.file.is_some() {
                        self.core
                            .set_page_exists(db, &child, PageExists::HasContent)?;
                    }
                }
                Some(row) => {
                    if backing.file.is_some() && row.page_exists != PageExists::HasContent {
                        self.core
                            .set_page_exists(db, &row, PageExists::HasContent)?;
                    }

                    let check = if checktree {
                        Some(if backing.folder.is_some() || row.n_children > 0 {
                            NeedsCheck::CheckTree
                        } else {
                            NeedsCheck::CheckPage
                        })
                    } else if backing.file.is_some() != row.content_etag.is_some() {
                        Some(NeedsCheck::CheckPage)
                    } else if backing.folder.is_some() != (row.n_children > 0) {
                        Some(NeedsCheck::CheckChildren)
                    } else {
                        None
                    };

                    match check {
                        Some(check) => db.execute(
                            "UPDATE pages SET childseen=1, needscheck=?1 WHERE id=?2",
                            rusqlite::params![check.as_i64(), row.id],
                        )?,
                        None => db.execute(
                            "UPDATE pages SET childseen=1 WHERE id=?1",
                            [row.id],
                        )?,
                    };
                }
            }
        }

        let vanished: Vec<PageRow> = self
            .core
            .pages
            .children(db, page)?
            .into_iter()
            .filter(|row| {
                db.query_row("SELECT childseen FROM pages WHERE id=?1", [row.id], |r| {
                    r.get::<_, i64>(0)
                })
                .map(|seen| seen == 0)
                .unwrap_or(false)
            })
            .collect();
        for child in vanished {
            self.delete_children(db, &child)?;
            match self.core.pages.lookup_by_id(db, child.id) {
                Ok(fresh) => {
                    self.core.delete_page(db, &fresh, false)?;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Delete a page's subtree depth-first. Rows that disappeared
    /// through concurrent cleanup within the transaction are skipped.
    fn delete_children(&self, db: &Connection, page: &PageRow) -> Result<()> {
        for child in self.core.pages.children(db, page)? {
            self.delete_children(db, &child)?;
            match self.core.pages.lookup_by_id(db, child.id) {
                Ok(fresh) => {
                    self.core.delete_page(db, &fresh, false)?;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Compare the content etag and re-index the page when it differs;
    /// then queue a (non-recursive) children check if the folder
    /// changed too.
    fn check_page(&self, db: &Connection, page: &PageRow) -> Result<()> {
        let backing = self.core.layout().map_page(&page.name);
        let etag = backing.file.map(|stat| stat.etag());
        if etag != page.content_etag {
            self.core.index_page(db, page)?;
        }

        let children_etag = backing.folder.map(|stat| stat.etag());
        let needscheck = if children_etag == page.children_etag {
            NeedsCheck::UpToDate
        } else {
            self.core
                .set_property(db, PROP_PROBABLY_UPTODATE, Some("0"))?;
            NeedsCheck::CheckChildren
        };
        db.execute(
            "UPDATE pages SET needscheck=?1 WHERE id=?2",
            rusqlite::params![needscheck.as_i64(), page.id],
        )?;
        Ok(())
    }
}

/// A child with a subfolder owes a tree check, one without only a
/// content check.
fn child_check(backing: &PageBacking) -> NeedsCheck {
    if backing.folder.is_some() {
        NeedsCheck::CheckTree
    } else {
        NeedsCheck::CheckPage
    }
}
