//! Row types for the `pages` and `links` tables.

use chrono::{DateTime, Utc};

use crate::model::PageName;

/// Existence level of a page record, stored in `pages.page_exists`.
///
/// Ordered: a record starts [`Uncertain`](PageExists::Uncertain), is kept
/// alive as [`AsLink`](PageExists::AsLink) when only links point at it,
/// and is [`HasContent`](PageExists::HasContent) when a backing file is
/// present. Existence is monotone up the tree: a parent's level is always
/// at least the maximum of its children's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PageExists {
    /// Row inserted but existence not confirmed.
    Uncertain = 0,
    /// No backing content; kept because some other page links here.
    AsLink = 1,
    /// A backing file is present in the store.
    HasContent = 2,
}

impl PageExists {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::AsLink,
            2 => Self::HasContent,
            _ => Self::Uncertain,
        }
    }
}

/// Pending check level of a page record, stored in `pages.needscheck`.
///
/// Lower values take precedence when the tree indexer picks its next
/// page, so structural checks run before content checks and the tree
/// shape is complete early. `NeedUpdateChildren` and `NeedUpdatePage`
/// are reserved for externally driven updates and never produced by the
/// tree indexer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NeedsCheck {
    /// Not in the work queue.
    UpToDate = 0,
    NeedUpdateChildren = 1,
    NeedUpdatePage = 2,
    /// Verify children etag; reconcile and recurse into children.
    CheckTree = 3,
    /// Verify children etag; touch only changed children, no recursion.
    CheckChildren = 4,
    /// Verify content etag only.
    CheckPage = 5,
}

impl NeedsCheck {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::NeedUpdateChildren,
            2 => Self::NeedUpdatePage,
            3 => Self::CheckTree,
            4 => Self::CheckChildren,
            5 => Self::CheckPage,
            _ => Self::UpToDate,
        }
    }
}

/// Relation kind of a link, stored in `links.rel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRel {
    /// Resolved from the root of the tree.
    Absolute = 0,
    /// Resolved against the source page's namespace.
    Relative = 1,
}

impl LinkRel {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Relative,
            _ => Self::Absolute,
        }
    }
}

/// A materialised row of the `pages` table, carrying the full page name.
///
/// Snapshots the row at lookup time; fields are not live views of the
/// database.
#[derive(Debug, Clone)]
pub struct PageRow {
    pub id: i64,
    pub name: PageName,
    pub parent: i64,
    pub page_exists: PageExists,
    pub content_etag: Option<String>,
    pub children_etag: Option<String>,
    pub ctime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
    pub n_children: i64,
    pub needscheck: NeedsCheck,
}

impl PageRow {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.name.is_root()
    }

    /// True when the record carries indexed file content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.page_exists == PageExists::HasContent
    }

    #[must_use]
    pub fn basename(&self) -> &str {
        self.name.basename()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_exists_ordering() {
        assert!(PageExists::Uncertain < PageExists::AsLink);
        assert!(PageExists::AsLink < PageExists::HasContent);
        assert_eq!(PageExists::from_i64(2), PageExists::HasContent);
        assert_eq!(PageExists::from_i64(99), PageExists::Uncertain);
    }

    #[test]
    fn test_needscheck_priority_order() {
        assert!(NeedsCheck::CheckTree < NeedsCheck::CheckChildren);
        assert!(NeedsCheck::CheckChildren < NeedsCheck::CheckPage);
        assert_eq!(NeedsCheck::from_i64(5), NeedsCheck::CheckPage);
        assert_eq!(NeedsCheck::from_i64(0), NeedsCheck::UpToDate);
    }
}
