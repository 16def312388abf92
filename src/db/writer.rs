//! Per-directory database writer
//!
//! One directory, one transaction: every entry row and the summary row go
//! in together through cached prepared statements.

use crate::db::schema;
use crate::entry::{DirSummary, EntryRecord};
use crate::error::DbResult;
use rusqlite::{params, Connection};
use std::path::Path;

/// Write `entries` and the directory's summary row into `db_path`
///
/// The database must already exist (copied from the template). Returns the
/// number of entry rows written.
pub fn write_directory(
    db_path: &Path,
    dir: &EntryRecord,
    summary: &DirSummary,
    depth: usize,
    entries: &[EntryRecord],
) -> DbResult<u64> {
    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(schema::WRITE_PRAGMAS)?;

    let tx = conn.transaction()?;
    let written = {
        let mut stmt = tx.prepare_cached(&schema::insert_entry_sql())?;
        let mut written = 0u64;
        for entry in entries {
            stmt.execute(params![
                entry.basename(),
                entry.kind.tag(),
                entry.meta.inode as i64,
                entry.meta.mode,
                entry.meta.nlink as i64,
                entry.meta.uid,
                entry.meta.gid,
                entry.meta.size as i64,
                entry.meta.blksize as i64,
                entry.meta.blocks as i64,
                entry.meta.atime,
                entry.meta.mtime,
                entry.meta.ctime,
                entry.linkname,
                entry.xattrs,
                entry.meta.crtime,
            ])?;
            written += 1;
        }
        written
    };

    insert_summary(&tx, dir, summary, depth)?;
    tx.commit()?;

    Ok(written)
}

fn insert_summary(
    conn: &Connection,
    dir: &EntryRecord,
    summary: &DirSummary,
    depth: usize,
) -> DbResult<()> {
    let mut stmt = conn.prepare_cached(&schema::insert_summary_sql())?;
    stmt.execute(params![
        dir.basename(),
        dir.kind.tag(),
        dir.meta.inode as i64,
        dir.meta.mode,
        dir.meta.nlink as i64,
        dir.meta.uid,
        dir.meta.gid,
        dir.meta.size as i64,
        dir.meta.blksize as i64,
        dir.meta.blocks as i64,
        dir.meta.atime,
        dir.meta.mtime,
        dir.meta.ctime,
        dir.linkname,
        dir.xattrs,
        dir.meta.crtime,
        summary.files as i64,
        summary.links as i64,
        summary.subdirs as i64,
        summary.bytes as i64,
        summary.min_size.map(|v| v as i64),
        summary.max_size.map(|v| v as i64),
        summary.min_mtime,
        summary.max_mtime,
        depth as i64,
    ])?;
    Ok(())
}
