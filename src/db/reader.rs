//! Read-side helpers for per-directory databases

use crate::db::schema::DB_NAME;
use crate::error::{DbError, DbResult};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::io;
use std::path::Path;

/// Open the database of index directory `dir` read-only
pub fn open_readonly(dir: &Path) -> DbResult<Connection> {
    let db_path = dir.join(DB_NAME);
    if !db_path.is_file() {
        return Err(DbError::Missing { path: db_path });
    }

    let conn = Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Register `path()`, returning the directory currently being queried
pub fn register_path_function(conn: &Connection, dir: &Path) -> DbResult<()> {
    let path = dir.to_string_lossy().into_owned();
    conn.create_scalar_function(
        "path",
        0,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |_ctx| Ok(path.clone()),
    )?;
    Ok(())
}

/// Run `sql` and hand every row to `emit` as delimiter-joined text
///
/// Returns the number of rows produced.
pub fn query_rows<F>(conn: &Connection, sql: &str, delim: char, mut emit: F) -> DbResult<u64>
where
    F: FnMut(&str) -> io::Result<()>,
{
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut line = String::new();
    let mut count = 0;
    while let Some(row) = rows.next()? {
        line.clear();
        for i in 0..columns {
            if i > 0 {
                line.push(delim);
            }
            push_value(&mut line, row.get_ref(i)?);
        }
        emit(&line).map_err(DbError::Emit)?;
        count += 1;
    }

    Ok(count)
}

fn push_value(line: &mut String, value: ValueRef<'_>) {
    use std::fmt::Write;

    match value {
        ValueRef::Null => {}
        ValueRef::Integer(i) => {
            let _ = write!(line, "{}", i);
        }
        ValueRef::Real(f) => {
            let _ = write!(line, "{}", f);
        }
        ValueRef::Text(t) => line.push_str(&String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => line.push_str(&String::from_utf8_lossy(b)),
    }
}

/// Subtree-independent totals from a directory's summary row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryTotals {
    pub files: u64,
    pub links: u64,
    pub bytes: u64,
}

/// Read the summary row of an open directory database
pub fn read_summary_totals(conn: &Connection) -> DbResult<SummaryTotals> {
    let result = conn.query_row(
        "SELECT totfiles, totlinks, totsize FROM summary LIMIT 1",
        [],
        |row| {
            Ok(SummaryTotals {
                files: row.get::<_, i64>(0)? as u64,
                links: row.get::<_, i64>(1)? as u64,
                bytes: row.get::<_, i64>(2)? as u64,
            })
        },
    );

    match result {
        Ok(totals) => Ok(totals),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SummaryTotals::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        assert!(matches!(open_readonly(dir.path()), Err(DbError::Missing { .. })));
    }

    #[test]
    fn test_query_rows_and_path() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO entries (name, type, size, linkname) VALUES ('a', 'f', 10, NULL), ('b', 'f', 20, 'x')",
            [],
        )
        .unwrap();
        register_path_function(&conn, Path::new("/idx/top")).unwrap();

        let mut lines = Vec::new();
        let n = query_rows(
            &conn,
            "SELECT path(), name, size, linkname FROM entries ORDER BY name",
            '|',
            |line| {
                lines.push(line.to_string());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(n, 2);
        assert_eq!(lines, vec!["/idx/top|a|10|", "/idx/top|b|20|x"]);
    }

    #[test]
    fn test_summary_totals() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        assert_eq!(read_summary_totals(&conn).unwrap(), SummaryTotals::default());

        conn.execute(
            "INSERT INTO summary (name, type, totfiles, totlinks, totsize, depth) VALUES ('d', 'd', 3, 1, 300, 0)",
            [],
        )
        .unwrap();
        assert_eq!(
            read_summary_totals(&conn).unwrap(),
            SummaryTotals {
                files: 3,
                links: 1,
                bytes: 300
            }
        );
    }
}
