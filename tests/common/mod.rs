//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use notedex::index::{Index, PagesReader, Signal, ROOT_ID};
use notedex::layout::MemoryLayout;
use notedex::model::{PageExists, PageName};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn name(s: &str) -> PageName {
    PageName::new(s)
}

/// Build an in-memory index over a fresh layout populated with
/// `(page, text)` pairs.
pub fn memory_fixture(pages: &[(&str, &str)]) -> (Arc<MemoryLayout>, Index) {
    let layout = Arc::new(MemoryLayout::new());
    for (page, text) in pages {
        layout.store_page(&name(page), text);
    }
    let index = Index::new_from_memory(layout.clone()).expect("open in-memory index");
    (layout, index)
}

/// Existence level of a page, or `None` when it has no row.
pub fn exists_level(index: &Index, page: &str) -> Option<PageExists> {
    match index.lookup_page(&name(page)) {
        Ok(row) => Some(row.page_exists),
        Err(err) if err.is_not_found() => None,
        Err(err) => panic!("lookup failed: {err}"),
    }
}

/// All resolved links as (source name, target name) pairs, excluding
/// the synthetic root-sourced ones.
pub fn link_pairs(index: &Index) -> Vec<(String, String)> {
    index
        .read(|conn| {
            let reader = PagesReader;
            let raw: Vec<(i64, i64)> = conn
                .prepare("SELECT source, target FROM links WHERE source<>?1 ORDER BY source, target")?
                .query_map([ROOT_ID], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            let mut pairs = Vec::new();
            for (source, target) in raw {
                let source_name = reader.lookup_by_id(conn, source)?.name;
                let target_name = if target == 0 {
                    "?".to_string()
                } else {
                    reader.lookup_by_id(conn, target)?.name.to_string()
                };
                pairs.push((source_name.to_string(), target_name));
            }
            Ok(pairs)
        })
        .expect("read links")
}

/// Tags as (page name, tag) pairs.
pub fn tag_pairs(index: &Index) -> Vec<(String, String)> {
    index
        .read(|conn| {
            let reader = PagesReader;
            let raw: Vec<(i64, String)> = conn
                .prepare(
                    "SELECT s.source, t.name FROM tagsources s \
                     JOIN tags t ON t.id = s.tag ORDER BY s.source, t.name",
                )?
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            let mut pairs = Vec::new();
            for (source, tag) in raw {
                let page = reader.lookup_by_id(conn, source)?.name;
                pairs.push((page.to_string(), tag));
            }
            Ok(pairs)
        })
        .expect("read tags")
}

/// Stable snapshot of the pages table, ignoring the transient
/// `childseen` scratch flag.
pub fn snapshot_pages(index: &Index) -> Vec<(i64, i64, String, i64, Option<String>, Option<String>, i64, i64)> {
    index
        .read(|conn| {
            let rows = conn
                .prepare(
                    "SELECT id, parent, basename, page_exists, content_etag, children_etag, \
                     n_children, needscheck FROM pages ORDER BY id",
                )?
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
        .expect("snapshot pages")
}

/// Semantic summary of the index, for comparing two independently
/// built databases (row ids will differ).
pub fn semantic_state(index: &Index) -> Vec<(String, i64, bool)> {
    let mut state: Vec<(String, i64, bool)> = index
        .read(|conn| {
            let reader = PagesReader;
            let ids: Vec<i64> = conn
                .prepare("SELECT id FROM pages WHERE id<>?1")?
                .query_map([ROOT_ID], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            let mut rows = Vec::new();
            for id in ids {
                let row = reader.lookup_by_id(conn, id)?;
                rows.push((
                    row.name.to_string(),
                    row.page_exists.as_i64(),
                    row.content_etag.is_some(),
                ));
            }
            Ok(rows)
        })
        .expect("semantic state");
    state.sort();
    state
}

/// Collects delivered signals for assertions.
#[derive(Default)]
pub struct SignalLog {
    entries: Arc<Mutex<Vec<(String, String)>>>,
    count: Arc<AtomicUsize>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect this log to a signal on the index.
    pub fn attach(&self, index: &Index, signal: &str) {
        let entries = self.entries.clone();
        let count = self.count.clone();
        index
            .connect(signal, move |signal: &Signal| {
                entries
                    .lock()
                    .push((signal.name.to_string(), signal.page.to_string()));
                count.fetch_add(1, Ordering::SeqCst);
            })
            .expect("connect signal");
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn contains(&self, signal: &str, page: &str) -> bool {
        self.entries()
            .iter()
            .any(|(name, p)| name == signal && p == page)
    }
}
