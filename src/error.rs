//! Error types for the notebook index.
//!
//! The index distinguishes lookup misses (expected, callers branch on
//! them) from consistency violations (a bug or a corrupt database) and
//! from parse failures (bad page content, contained per page).

use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in index operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A page was looked up that has no record in the index.
    #[error("page not found in index: {name}")]
    IndexNotFound { name: String },

    /// An internal invariant was violated. Indicates a bug or a
    /// database that was modified behind the index's back.
    #[error("index consistency violated: {0}")]
    Consistency(String),

    /// `connect` was called with a signal name no registered
    /// sub-indexer advertises.
    #[error("no such signal: {0}")]
    UnknownSignal(String),

    /// Page content could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a lookup miss on a named page.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::IndexNotFound { name: name.into() }
    }

    /// True if this is a lookup miss rather than a real failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. })
    }
}
