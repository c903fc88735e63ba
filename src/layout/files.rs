//! File-backed notebook layout.
//!
//! One text file per page (`Name.txt`), with an optional same-named
//! folder holding the page's children:
//!
//! ```text
//! notebook/
//!   Projects.txt
//!   Projects/
//!     Todo.txt
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::layout::{EntryStat, NotebookLayout, PageBacking};
use crate::model::PageName;
use crate::parse::{PageFormat, WikiFormat};

const PAGE_SUFFIX: &str = ".txt";

/// Layout over a notebook directory on disk.
#[derive(Debug)]
pub struct FilesLayout {
    root: PathBuf,
    format: WikiFormat,
}

impl FilesLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            format: WikiFormat,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `page`; the root page has no file.
    #[must_use]
    pub fn file_path(&self, page: &PageName) -> Option<PathBuf> {
        if page.is_root() {
            return None;
        }
        let mut path = self.root.clone();
        let parts: Vec<&str> = page.parts().collect();
        for part in &parts[..parts.len() - 1] {
            path.push(part);
        }
        path.push(format!("{}{PAGE_SUFFIX}", parts[parts.len() - 1]));
        Some(path)
    }

    /// Path of the folder holding `page`'s children.
    #[must_use]
    pub fn folder_path(&self, page: &PageName) -> PathBuf {
        let mut path = self.root.clone();
        for part in page.parts() {
            path.push(part);
        }
        path
    }

    fn stat(path: &Path, want_dir: bool) -> Option<EntryStat> {
        let meta = fs::metadata(path).ok()?;
        if meta.is_dir() != want_dir {
            return None;
        }
        let mtime: DateTime<Utc> = meta.modified().ok()?.into();
        let ctime: DateTime<Utc> = meta.created().map_or(mtime, Into::into);
        Some(EntryStat { mtime, ctime })
    }
}

impl NotebookLayout for FilesLayout {
    fn list_children(&self, page: &PageName) -> Result<Vec<PageName>> {
        let dir = self.folder_path(page);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut basenames = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                basenames.insert(name);
            } else if let Some(stem) = name.strip_suffix(PAGE_SUFFIX) {
                if !stem.is_empty() {
                    basenames.insert(stem.to_string());
                }
            }
        }

        Ok(basenames.iter().map(|name| page.child(name)).collect())
    }

    fn map_page(&self, page: &PageName) -> PageBacking {
        PageBacking {
            file: self
                .file_path(page)
                .and_then(|path| Self::stat(&path, false)),
            folder: Self::stat(&self.folder_path(page), true),
        }
    }

    fn read_page(&self, page: &PageName) -> Result<Option<String>> {
        let Some(path) = self.file_path(page) else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn format(&self) -> &dyn PageFormat {
        &self.format
    }
}
