//! In-memory notebook layout.
//!
//! Backs pages with a map instead of a filesystem. Modification times
//! come from a logical clock that advances one second per mutation, so
//! every change produces a distinct etag; real filesystems only promise
//! that much on a good day.
//!
//! Folder mtimes follow filesystem semantics: creating or removing an
//! entry bumps the containing folder's mtime, but not the mtimes of
//! folders further up. That asymmetry is exactly what the tree check
//! recursion exists to cover.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::layout::{EntryStat, NotebookLayout, PageBacking};
use crate::model::PageName;
use crate::parse::{PageFormat, WikiFormat};

#[derive(Debug, Clone)]
struct MemFile {
    text: String,
    mtime: DateTime<Utc>,
    ctime: DateTime<Utc>,
}

#[derive(Debug)]
struct MemStore {
    files: BTreeMap<PageName, MemFile>,
    folders: BTreeMap<PageName, DateTime<Utc>>,
    clock: i64,
}

impl MemStore {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(1_600_000_000 + self.clock, 0)
            .single()
            .expect("logical clock in range")
    }

    fn ensure_folder(&mut self, folder: &PageName, now: DateTime<Utc>) {
        if self.folders.contains_key(folder) {
            return;
        }
        if !folder.is_root() {
            let parent = folder.parent();
            self.ensure_folder(&parent, now);
            self.folders.insert(parent.clone(), now);
        }
        self.folders.insert(folder.clone(), now);
    }

    fn has_entries(&self, folder: &PageName) -> bool {
        self.files.keys().any(|name| &name.parent() == folder)
            || self
                .folders
                .keys()
                .any(|name| !name.is_root() && &name.parent() == folder)
    }

    fn prune_folders(&mut self, from: &PageName, now: DateTime<Utc>) {
        let mut folder = from.clone();
        while !folder.is_root() && !self.has_entries(&folder) {
            self.folders.remove(&folder);
            let parent = folder.parent();
            self.folders.insert(parent.clone(), now);
            folder = parent;
        }
    }
}

/// A notebook held entirely in memory.
#[derive(Debug)]
pub struct MemoryLayout {
    store: Mutex<MemStore>,
    format: WikiFormat,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLayout {
    #[must_use]
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(
            PageName::root(),
            Utc.timestamp_opt(1_600_000_000, 0).single().expect("epoch"),
        );
        Self {
            store: Mutex::new(MemStore {
                files: BTreeMap::new(),
                folders,
                clock: 0,
            }),
            format: WikiFormat,
        }
    }

    /// Create or overwrite a page file.
    pub fn store_page(&self, name: &PageName, text: &str) {
        assert!(!name.is_root(), "the root page has no file");
        let mut store = self.store.lock();
        let now = store.tick();
        let parent = name.parent();
        store.ensure_folder(&parent, now);
        let is_new = !store.files.contains_key(name);
        if is_new {
            store.folders.insert(parent, now);
        }
        let ctime = store.files.get(name).map_or(now, |f| f.ctime);
        store.files.insert(
            name.clone(),
            MemFile {
                text: text.to_string(),
                mtime: now,
                ctime,
            },
        );
    }

    /// Remove a page file, pruning folders that become empty.
    pub fn remove_page(&self, name: &PageName) {
        let mut store = self.store.lock();
        let now = store.tick();
        if store.files.remove(name).is_some() {
            let parent = name.parent();
            if store.folders.contains_key(&parent) {
                store.folders.insert(parent.clone(), now);
            }
            store.prune_folders(&parent, now);
        }
    }

    /// Remove a page and everything below it.
    pub fn remove_tree(&self, name: &PageName) {
        let doomed: Vec<PageName> = {
            let store = self.store.lock();
            store
                .files
                .keys()
                .filter(|candidate| *candidate == name || name.is_ancestor_of(candidate))
                .cloned()
                .collect()
        };
        for page in doomed {
            self.remove_page(&page);
        }
        let mut store = self.store.lock();
        let now = store.tick();
        let folders: Vec<PageName> = store
            .folders
            .keys()
            .filter(|candidate| *candidate == name || name.is_ancestor_of(candidate))
            .cloned()
            .collect();
        if !folders.is_empty() {
            for folder in folders {
                store.folders.remove(&folder);
            }
            let parent = name.parent();
            if store.folders.contains_key(&parent) {
                store.folders.insert(parent.clone(), now);
            }
            store.prune_folders(&parent, now);
        }
    }

    /// Number of stored page files.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.store.lock().files.len()
    }
}

impl NotebookLayout for MemoryLayout {
    fn list_children(&self, page: &PageName) -> Result<Vec<PageName>> {
        let store = self.store.lock();
        let mut basenames: Vec<String> = store
            .files
            .keys()
            .filter(|name| &name.parent() == page)
            .map(|name| name.basename().to_string())
            .chain(
                store
                    .folders
                    .keys()
                    .filter(|name| !name.is_root() && &name.parent() == page)
                    .map(|name| name.basename().to_string()),
            )
            .collect();
        basenames.sort();
        basenames.dedup();
        Ok(basenames.iter().map(|name| page.child(name)).collect())
    }

    fn map_page(&self, page: &PageName) -> PageBacking {
        let store = self.store.lock();
        PageBacking {
            file: store.files.get(page).map(|f| EntryStat {
                mtime: f.mtime,
                ctime: f.ctime,
            }),
            folder: store.folders.get(page).map(|mtime| EntryStat {
                mtime: *mtime,
                ctime: *mtime,
            }),
        }
    }

    fn read_page(&self, page: &PageName) -> Result<Option<String>> {
        Ok(self.store.lock().files.get(page).map(|f| f.text.clone()))
    }

    fn format(&self) -> &dyn PageFormat {
        &self.format
    }
}
