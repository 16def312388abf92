//! Per-directory database schema
//!
//! Every indexed directory gets its own SQLite file holding one row per
//! non-directory entry plus a single summary row for the directory itself.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the database inside each mirrored directory
pub const DB_NAME: &str = "db.db";

/// Columns shared by `entries` and `summary`, in insert order
const ENTRY_COLUMNS: &str = "name, type, inode, mode, nlink, uid, gid, size, blksize, blocks, \
                             atime, mtime, ctime, linkname, xattrs, crtime";

/// SQL to create the entries table
const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    name TEXT NOT NULL,
    type TEXT NOT NULL,          -- f=file, l=symlink
    inode INTEGER,
    mode INTEGER,
    nlink INTEGER,
    uid INTEGER,
    gid INTEGER,
    size INTEGER DEFAULT 0,
    blksize INTEGER,
    blocks INTEGER DEFAULT 0,    -- 512-byte blocks allocated
    atime INTEGER,               -- Unix timestamps
    mtime INTEGER,
    ctime INTEGER,
    linkname TEXT,
    xattrs TEXT,
    crtime INTEGER
)
"#;

/// SQL to create the directory summary table
const CREATE_SUMMARY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS summary (
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    inode INTEGER,
    mode INTEGER,
    nlink INTEGER,
    uid INTEGER,
    gid INTEGER,
    size INTEGER,
    blksize INTEGER,
    blocks INTEGER,
    atime INTEGER,
    mtime INTEGER,
    ctime INTEGER,
    linkname TEXT,
    xattrs TEXT,
    crtime INTEGER,
    totfiles INTEGER DEFAULT 0,
    totlinks INTEGER DEFAULT 0,
    totsubdirs INTEGER DEFAULT 0,
    totsize INTEGER DEFAULT 0,
    minsize INTEGER,
    maxsize INTEGER,
    minmtime INTEGER,
    maxmtime INTEGER,
    depth INTEGER NOT NULL
)
"#;

/// SQL to create the metadata table
const CREATE_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// Pragmas for the short-lived writer of one directory
pub(crate) const WRITE_PRAGMAS: &str = r#"
PRAGMA synchronous = OFF;
PRAGMA journal_mode = OFF;
PRAGMA temp_store = MEMORY;
"#;

/// SQL to insert into `entries`
pub(crate) fn insert_entry_sql() -> String {
    format!(
        "INSERT INTO entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        ENTRY_COLUMNS
    )
}

/// SQL to insert the summary row
pub(crate) fn insert_summary_sql() -> String {
    format!(
        "INSERT INTO summary ({}, totfiles, totlinks, totsubdirs, totsize, minsize, maxsize, minmtime, maxmtime, depth) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        ENTRY_COLUMNS
    )
}

/// Create the tables of a per-directory database
pub fn create_tables(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;

    conn.execute(CREATE_ENTRIES_TABLE, [])?;
    conn.execute(CREATE_SUMMARY_TABLE, [])?;
    conn.execute(CREATE_INFO_TABLE, [])?;

    set_info(conn, keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
    set_info(conn, keys::TOOL_VERSION, env!("CARGO_PKG_VERSION"))?;

    Ok(())
}

/// Store a metadata value
pub fn set_info(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata value
pub fn get_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row("SELECT value FROM info WHERE key = ?1", [key], |row| {
        row.get(0)
    });

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys
pub mod keys {
    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// treeindex version that wrote the database
    pub const TOOL_VERSION: &str = "tool_version";
}
