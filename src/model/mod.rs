//! Data models for the notebook index.
//!
//! - [`PageName`] - colon-delimited page addresses and sort keys
//! - [`PageRow`] - a materialised row of the `pages` table, plus the
//!   `page_exists` / `needscheck` enums stored in it

pub mod page;
pub mod row;

pub use page::{natural_sort_key, PageName};
pub use row::{LinkRel, NeedsCheck, PageExists, PageRow};
