//! Tags sub-indexer.
//!
//! Keeps a bag of (page, tag) associations in two tables: `tags` for
//! interned tag names and `tagsources` for the associations. Indexing a
//! page replaces its tag set wholesale; tag rows are garbage-collected
//! once their last source is gone.

use std::collections::BTreeSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::index::core::IndexCore;
use crate::index::signals::{SignalEmitter, SIGNAL_TAG_ADDED, SIGNAL_TAG_REMOVED};
use crate::index::SubIndexer;
use crate::model::PageRow;
use crate::parse::ParseTree;

const TAGS_SIGNALS: &[&str] = &[SIGNAL_TAG_ADDED, SIGNAL_TAG_REMOVED];

const TAGS_TABLE_SQL: &str = "
CREATE TABLE tags (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    CONSTRAINT uc_TagOnce UNIQUE (name)
);
CREATE TABLE tagsources (
    source INTEGER NOT NULL,
    tag INTEGER NOT NULL,
    CONSTRAINT uc_TagSourceOnce UNIQUE (source, tag)
);
CREATE INDEX idx_tagsources_tag ON tagsources(tag);
";

/// Maintains the `tags` / `tagsources` tables.
pub struct TagsIndexer {
    emitter: SignalEmitter,
}

impl TagsIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitter: SignalEmitter::new(TAGS_SIGNALS),
        }
    }

    fn replace_tags(
        &self,
        db: &Connection,
        page: &PageRow,
        new_tags: &BTreeSet<String>,
    ) -> Result<()> {
        let current: Vec<(i64, String)> = db
            .prepare(
                "SELECT t.id, t.name FROM tags t \
                 JOIN tagsources s ON s.tag = t.id WHERE s.source=?1",
            )?
            .query_map([page.id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        let current_names: BTreeSet<String> =
            current.iter().map(|(_, name)| name.clone()).collect();

        for (tag_id, name) in &current {
            if !new_tags.contains(name) {
                db.execute(
                    "DELETE FROM tagsources WHERE source=?1 AND tag=?2",
                    rusqlite::params![page.id, tag_id],
                )?;
                self.emitter
                    .queue(SIGNAL_TAG_REMOVED, page.name.clone(), Some(name.clone()));
            }
        }

        for name in new_tags {
            if !current_names.contains(name) {
                db.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [name])?;
                let tag_id: i64 =
                    db.query_row("SELECT id FROM tags WHERE name=?1", [name], |row| {
                        row.get(0)
                    })?;
                db.execute(
                    "INSERT OR IGNORE INTO tagsources (source, tag) VALUES (?1, ?2)",
                    rusqlite::params![page.id, tag_id],
                )?;
                self.emitter
                    .queue(SIGNAL_TAG_ADDED, page.name.clone(), Some(name.clone()));
            }
        }

        db.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag FROM tagsources)",
            [],
        )?;
        Ok(())
    }
}

impl Default for TagsIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubIndexer for TagsIndexer {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn emitter(&self) -> &SignalEmitter {
        &self.emitter
    }

    fn on_db_init(&self, _core: &IndexCore, db: &Connection) -> Result<()> {
        db.execute_batch(TAGS_TABLE_SQL)?;
        Ok(())
    }

    fn on_index_page(
        &self,
        _core: &IndexCore,
        db: &Connection,
        page: &PageRow,
        tree: Option<&ParseTree>,
    ) -> Result<()> {
        let new_tags: BTreeSet<String> = tree
            .map(|tree| tree.tags.iter().cloned().collect())
            .unwrap_or_default();
        self.replace_tags(db, page, &new_tags)
    }

    fn on_delete_page(&self, _core: &IndexCore, db: &Connection, page: &PageRow) -> Result<()> {
        self.replace_tags(db, page, &BTreeSet::new())
    }
}
