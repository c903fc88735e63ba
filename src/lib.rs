//! notedex - incremental SQLite index for hierarchical note collections.
//!
//! A notebook is a tree of pages that link to and tag each other. This
//! crate maintains a persistent index of that tree so UI operations
//! (rendering the hierarchy, "what links here", tag filters) never
//! rescan the store. Updates are incremental, driven by store mtimes
//! used as etags, and can run on a background thread that interactive
//! edits pre-empt between commits.
//!
//! # Architecture
//!
//! - [`index`] - the [`Index`](index::Index) facade, the tree-walking
//!   state machine, and the pages/links/tags sub-indexers
//! - [`db`] - connection management with two-tier locking
//! - [`layout`] - the storage layout contract plus file-backed and
//!   in-memory implementations
//! - [`parse`] - the page format contract and the bundled wiki format
//! - [`model`] - page names and row types
//! - [`error`] - error types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use notedex::index::Index;
//! use notedex::layout::MemoryLayout;
//! use notedex::model::PageName;
//!
//! # fn main() -> notedex::Result<()> {
//! let layout = Arc::new(MemoryLayout::new());
//! layout.store_page(&PageName::new("Projects:Todo"), "see [[Ideas]] @urgent");
//!
//! let index = Index::new_from_memory(layout)?;
//! index.update(None)?;
//! assert!(index.probably_uptodate()?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod error;
pub mod index;
pub mod layout;
pub mod model;
pub mod parse;

pub use error::{Error, Result};
pub use index::Index;
