//! Storage layout contract.
//!
//! The index never touches the note store directly; it consults a
//! [`NotebookLayout`] for three things: the children listed under a
//! page, the backing file/folder of a page (with their modification
//! times, which serve as etags), and the page content plus the format
//! that parses it.
//!
//! Two implementations ship with the crate: [`FilesLayout`] for the
//! usual one-file-per-page disk layout and [`MemoryLayout`] for
//! in-memory notebooks and tests.

mod files;
mod memory;

pub use files::FilesLayout;
pub use memory::MemoryLayout;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::PageName;
use crate::parse::PageFormat;

/// Stat of a store entry at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

impl EntryStat {
    /// The etag for this entry: its mtime coerced to a string. Compares
    /// equal iff the entry has not changed.
    #[must_use]
    pub fn etag(&self) -> String {
        self.mtime.timestamp_micros().to_string()
    }
}

/// The file and folder backing a page, either of which may be absent.
///
/// The stats are taken before content is read, so a concurrent change
/// leaves a stale etag behind and is caught by the next check.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageBacking {
    pub file: Option<EntryStat>,
    pub folder: Option<EntryStat>,
}

/// The interface the index consumes from a note store.
pub trait NotebookLayout: Send + Sync {
    /// Direct children present in the store under `page`, files and
    /// folders alike. Order does not matter; duplicates must not occur.
    ///
    /// # Errors
    ///
    /// Returns an error only for real store failures; a page with no
    /// folder simply lists no children.
    fn list_children(&self, page: &PageName) -> Result<Vec<PageName>>;

    /// Stat the file and folder backing `page`.
    fn map_page(&self, page: &PageName) -> PageBacking;

    /// Read page content; `Ok(None)` when the file does not exist
    /// (including when it vanished after a [`map_page`](Self::map_page)
    /// call).
    ///
    /// # Errors
    ///
    /// Returns an error for store failures other than a missing file.
    fn read_page(&self, page: &PageName) -> Result<Option<String>>;

    /// The format used to parse page content.
    fn format(&self) -> &dyn PageFormat;
}
