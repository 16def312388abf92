//! Query aggregation databases
//!
//! In aggregate mode a query does not print per-directory rows. Each
//! worker inserts them into its own intermediate database instead, so
//! workers never share a write lock. After the walk every intermediate is
//! merged into one aggregate database and a final query runs there.
//!
//! ```text
//!  worker 0 ──► intermediate-0.db ─┐
//!  worker 1 ──► intermediate-1.db ─┼─ merge SQL ──► aggregate.db ── final SQL ──► output
//!  worker N ──► intermediate-N.db ─┘  (aggregate attached)
//! ```
//!
//! The scratch databases live in a private temporary directory that is
//! removed when the [`Aggregator`] is dropped.

use crate::db::reader::query_rows;
use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Table every per-directory row is inserted into
pub const INTERMEDIATE_TABLE: &str = "intermediate";

/// Schema name the aggregate database is attached under during the merge
pub const AGGREGATE_ALIAS: &str = "aggregate";

/// SQL for the three aggregation stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSql {
    /// Run on each intermediate; must create the `intermediate` table
    pub create_intermediate: String,

    /// Run on the aggregate database to create its tables
    pub create_aggregate: String,

    /// Run on each intermediate with the aggregate attached as `aggregate`
    pub merge: String,

    /// Run on the aggregate database; its rows are the query's output
    pub final_query: String,
}

/// Per-worker intermediate databases plus the aggregate
pub struct Aggregator {
    dir: TempDir,
    intermediates: Vec<Mutex<Connection>>,
    sql: AggregateSql,
}

impl Aggregator {
    /// Create `workers` intermediates and the aggregate database
    pub fn create(workers: usize, sql: AggregateSql) -> DbResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("treeindex-aggregate-")
            .tempdir()
            .map_err(|e| DbError::CreateFailed {
                path: std::env::temp_dir(),
                source: e,
            })?;

        let aggregate = open_scratch(&dir.path().join("aggregate.db"))?;
        aggregate.execute_batch(&sql.create_aggregate)?;

        let mut intermediates = Vec::with_capacity(workers);
        for id in 0..workers {
            let conn = open_scratch(&dir.path().join(format!("intermediate-{}.db", id)))?;
            conn.execute_batch(&sql.create_intermediate)?;
            intermediates.push(Mutex::new(conn));
        }

        debug!("Aggregation databases under '{}'", dir.path().display());
        Ok(Self {
            dir,
            intermediates,
            sql,
        })
    }

    fn aggregate_path(&self) -> PathBuf {
        self.dir.path().join("aggregate.db")
    }

    /// Run `sql` against `source` and insert every row into worker `id`'s
    /// intermediate table; returns the number of rows moved
    pub fn collect(&self, id: usize, source: &Connection, sql: &str) -> DbResult<u64> {
        let mut stmt = source.prepare(sql)?;
        let columns = stmt.column_count();
        if columns == 0 {
            stmt.execute([])?;
            return Ok(0);
        }

        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            INTERMEDIATE_TABLE,
            vec!["?"; columns].join(", ")
        );

        let mut conn = self.intermediates[id].lock();
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut target = tx.prepare_cached(&insert)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let values = (0..columns)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                target.execute(params_from_iter(values))?;
                count += 1;
            }
        }
        tx.commit()?;

        Ok(count)
    }

    /// Merge every intermediate into the aggregate and run the final query
    ///
    /// Call once, after every worker is done. Returns the number of rows
    /// handed to `emit`.
    pub fn finish<F>(&self, delim: char, emit: F) -> DbResult<u64>
    where
        F: FnMut(&str) -> io::Result<()>,
    {
        let aggregate_path = self.aggregate_path();
        let attach = format!("ATTACH DATABASE ?1 AS {}", AGGREGATE_ALIAS);
        let detach = format!("DETACH DATABASE {}", AGGREGATE_ALIAS);

        for (id, conn) in self.intermediates.iter().enumerate() {
            let conn = conn.lock();
            conn.execute(&attach, [aggregate_path.to_string_lossy().into_owned()])?;
            let merged = conn.execute_batch(&self.sql.merge);
            conn.execute_batch(&detach)?;
            merged?;
            debug!("Merged intermediate {}", id);
        }

        let aggregate = Connection::open(&aggregate_path)?;
        query_rows(&aggregate, &self.sql.final_query, delim, emit)
    }
}

fn open_scratch(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql() -> AggregateSql {
        AggregateSql {
            create_intermediate: "CREATE TABLE intermediate (name TEXT, size INTEGER)".to_string(),
            create_aggregate: "CREATE TABLE sizes (name TEXT, size INTEGER)".to_string(),
            merge: "INSERT INTO aggregate.sizes SELECT * FROM intermediate".to_string(),
            final_query: "SELECT COUNT(*), SUM(size), MAX(name) FROM sizes".to_string(),
        }
    }

    fn source(rows: &[(&str, i64)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE entries (name TEXT, size INTEGER)").unwrap();
        for (name, size) in rows {
            conn.execute("INSERT INTO entries VALUES (?1, ?2)", rusqlite::params![name, size])
                .unwrap();
        }
        conn
    }

    #[test]
    fn test_rows_from_every_worker_are_merged() {
        let agg = Aggregator::create(3, sql()).unwrap();
        let scratch = agg.dir.path().to_path_buf();

        let a = source(&[("a", 1), ("b", 2)]);
        let b = source(&[("z", 40)]);
        assert_eq!(agg.collect(0, &a, "SELECT name, size FROM entries").unwrap(), 2);
        assert_eq!(agg.collect(2, &b, "SELECT name, size FROM entries").unwrap(), 1);
        assert_eq!(agg.collect(1, &b, "SELECT name, size FROM entries WHERE size < 0").unwrap(), 0);

        let mut out = Vec::new();
        let rows = agg
            .finish('|', |line| {
                out.push(line.to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(out, vec!["3|43|z"]);
        drop(agg);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_bad_stage_sql_is_reported() {
        let mut bad = sql();
        bad.create_intermediate = "CREATE TABLE nope (".to_string();
        assert!(Aggregator::create(1, bad).is_err());

        let agg = Aggregator::create(1, sql()).unwrap();
        let a = source(&[("a", 1)]);
        assert!(agg.collect(0, &a, "SELECT name FROM entries").is_err());
    }
}
