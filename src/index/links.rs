//! Links sub-indexer.
//!
//! Outgoing links are written with *unresolved* targets (`target=0`,
//! the textual reference in `names`) when a page is indexed, and
//! resolved in one batch at `before_commit`. Deferring resolution keeps
//! bulk imports linear and lets a transaction batch many inserts before
//! placeholder rows are created for dangling references.

use std::collections::BTreeSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::index::core::IndexCore;
use crate::index::signals::{SignalEmitter, SIGNAL_LINK_ADDED, SIGNAL_LINK_REMOVED};
use crate::index::SubIndexer;
use crate::model::{LinkRel, PageExists, PageName, PageRow};
use crate::parse::ParseTree;

const LINKS_SIGNALS: &[&str] = &[SIGNAL_LINK_ADDED, SIGNAL_LINK_REMOVED];

const LINKS_TABLE_SQL: &str = "
CREATE TABLE links (
    source INTEGER NOT NULL,
    target INTEGER NOT NULL DEFAULT 0,
    rel INTEGER NOT NULL DEFAULT 0,
    names TEXT NOT NULL
);
CREATE INDEX idx_links_source ON links(source);
CREATE INDEX idx_links_target ON links(target);
";

/// Maintains the `links` table, resolves deferred references, and
/// cleans up orphaned placeholders.
pub struct LinksIndexer {
    emitter: SignalEmitter,
}

impl LinksIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitter: SignalEmitter::new(LINKS_SIGNALS),
        }
    }

    fn outgoing_names(&self, db: &Connection, source: i64) -> Result<BTreeSet<String>> {
        let names: Vec<String> = db
            .prepare("SELECT names FROM links WHERE source=?1")?
            .query_map([source], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(names.into_iter().collect())
    }

    /// Resolve every unresolved link against the current page tree,
    /// creating placeholder rows for references with no existing
    /// target.
    fn check_links(&self, core: &IndexCore, db: &Connection) -> Result<()> {
        let unresolved: Vec<(i64, i64, i64, String)> = db
            .prepare("SELECT rowid, source, rel, names FROM links WHERE target=0")?
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        for (rowid, source_id, rel, names) in unresolved {
            let source = match core.pages.lookup_by_id(db, source_id) {
                Ok(row) => row,
                Err(err) if err.is_not_found() => {
                    // Source row vanished in this transaction; drop the link.
                    db.execute("DELETE FROM links WHERE rowid=?1", [rowid])?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let target_name =
                resolve_reference(core, db, &source.name, &names, LinkRel::from_i64(rel))?;
            let target = match core.pages.lookup_by_pagename(db, &target_name) {
                Ok(row) => row,
                Err(err) if err.is_not_found() => {
                    let row = core.touch_path(db, &target_name)?;
                    core.set_page_exists(db, &row, PageExists::AsLink)?;
                    row
                }
                Err(err) => return Err(err),
            };

            db.execute(
                "UPDATE links SET target=?1 WHERE rowid=?2",
                rusqlite::params![target.id, rowid],
            )?;
        }
        Ok(())
    }

    /// Remove placeholder rows that have neither an incoming link nor
    /// any children left. Runs to a fixpoint so a removed leaf exposes
    /// its placeholder parent in the next round.
    pub(crate) fn cleanup_placeholders(&self, core: &IndexCore, db: &Connection) -> Result<()> {
        loop {
            let orphans: Vec<i64> = db
                .prepare(
                    "SELECT id FROM pages WHERE page_exists=?1 AND n_children=0 \
                     AND NOT EXISTS (SELECT 1 FROM links WHERE target=pages.id)",
                )?
                .query_map([PageExists::AsLink.as_i64()], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;

            if orphans.is_empty() {
                return Ok(());
            }
            for id in orphans {
                match core.pages.lookup_by_id(db, id) {
                    Ok(row) => {
                        core.delete_page(db, &row, false)?;
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

impl Default for LinksIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubIndexer for LinksIndexer {
    fn name(&self) -> &'static str {
        "links"
    }

    fn emitter(&self) -> &SignalEmitter {
        &self.emitter
    }

    fn on_db_init(&self, _core: &IndexCore, db: &Connection) -> Result<()> {
        db.execute_batch(LINKS_TABLE_SQL)?;
        Ok(())
    }

    fn on_index_page(
        &self,
        _core: &IndexCore,
        db: &Connection,
        page: &PageRow,
        tree: Option<&ParseTree>,
    ) -> Result<()> {
        let old_names = self.outgoing_names(db, page.id)?;
        let new_names: BTreeSet<String> = tree
            .map(|tree| tree.links.iter().map(|link| link.href.clone()).collect())
            .unwrap_or_default();

        db.execute("DELETE FROM links WHERE source=?1", [page.id])?;
        if let Some(tree) = tree {
            for link in &tree.links {
                db.execute(
                    "INSERT INTO links (source, target, rel, names) VALUES (?1, 0, ?2, ?3)",
                    rusqlite::params![page.id, link.rel.as_i64(), link.href],
                )?;
            }
        }

        for name in old_names.difference(&new_names) {
            self.emitter
                .queue(SIGNAL_LINK_REMOVED, page.name.clone(), Some(name.clone()));
        }
        for name in new_names.difference(&old_names) {
            self.emitter
                .queue(SIGNAL_LINK_ADDED, page.name.clone(), Some(name.clone()));
        }
        Ok(())
    }

    fn on_delete_page(&self, _core: &IndexCore, db: &Connection, page: &PageRow) -> Result<()> {
        for name in self.outgoing_names(db, page.id)? {
            self.emitter
                .queue(SIGNAL_LINK_REMOVED, page.name.clone(), Some(name));
        }
        db.execute("DELETE FROM links WHERE source=?1", [page.id])?;
        // Incoming links fall back to unresolved; re-resolution at
        // before_commit re-creates a placeholder if anything still
        // points here.
        db.execute("UPDATE links SET target=0 WHERE target=?1", [page.id])?;
        Ok(())
    }

    fn before_commit(&self, core: &IndexCore, db: &Connection) -> Result<()> {
        self.check_links(core, db)?;
        self.cleanup_placeholders(core, db)
    }
}

/// Resolve a textual reference from `source` to a page name.
///
/// Absolute references resolve from the root. A `+` prefix resolves
/// below the source page. Anything else floats: the first name part is
/// anchored at the closest ancestor namespace that already contains it,
/// defaulting to a sibling of the source.
fn resolve_reference(
    core: &IndexCore,
    db: &Connection,
    source: &PageName,
    reference: &str,
    rel: LinkRel,
) -> Result<PageName> {
    match rel {
        LinkRel::Absolute => Ok(PageName::new(reference)),
        LinkRel::Relative => {
            if let Some(below) = reference.strip_prefix('+') {
                return Ok(join(source, below));
            }
            let target = PageName::new(reference);
            let Some(anchor) = target.parts().next().map(str::to_string) else {
                return Ok(source.clone());
            };

            let mut namespace = source.parent();
            loop {
                let candidate = namespace.child(&anchor);
                match core.pages.lookup_by_pagename(db, &candidate) {
                    Ok(_) => return Ok(join(&namespace, reference)),
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
                if namespace.is_root() {
                    break;
                }
                namespace = namespace.parent();
            }
            Ok(join(&source.parent(), reference))
        }
    }
}

fn join(base: &PageName, reference: &str) -> PageName {
    if base.is_root() {
        PageName::new(reference)
    } else {
        PageName::new(&format!("{}:{reference}", base.as_str()))
    }
}
