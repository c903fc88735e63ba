//! Metadata table and schema lifecycle.
//!
//! The `zim_index` table holds key/value properties: the schema
//! version, the `probably_uptodate` flag, and one key per registered
//! plugin indexer. Any version mismatch triggers a full rebuild; the
//! index is a cache, dropping it only costs a rescan.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Persisted schema version; any mismatch triggers a full rebuild.
pub const DB_VERSION: &str = "0.6";

/// Row id of the root page, inserted by the init script.
pub const ROOT_ID: i64 = 1;

pub(crate) const PROP_DB_VERSION: &str = "db_version";
pub(crate) const PROP_PROBABLY_UPTODATE: &str = "probably_uptodate";

/// Sentinel content etag that never matches a real mtime, used to
/// force re-indexing of every content-bearing page.
pub(crate) const REINDEX_ETAG: &str = "_reindex_";

const INIT_SQL: &str = "
CREATE TABLE zim_index (
    key TEXT,
    value TEXT,
    CONSTRAINT uc_MetaOnce UNIQUE (key)
);
INSERT INTO zim_index VALUES ('probably_uptodate', '0');
";

/// Create the metadata table and stamp the schema version.
pub(crate) fn init_metadata(db: &Connection) -> Result<()> {
    db.execute_batch(INIT_SQL)?;
    db.execute(
        "INSERT INTO zim_index (key, value) VALUES (?1, ?2)",
        rusqlite::params![PROP_DB_VERSION, DB_VERSION],
    )?;
    Ok(())
}

/// Drop every non-system table, leaving an empty database behind.
pub(crate) fn drop_all_tables(db: &Connection) -> Result<()> {
    let tables: Vec<String> = db
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite%'",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for table in tables {
        debug!(table, "dropping index table");
        db.execute_batch(&format!("DROP TABLE \"{table}\""))?;
    }
    Ok(())
}
