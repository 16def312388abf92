//! Query every directory database of an index in parallel
//!
//! Each directory runs the summary query (if any) and then the entries
//! query, printing rows through its worker's output buffer. Subdirectories
//! are enqueued after the local queries so a failing database stops only
//! its own subtree.
//!
//! Output goes to one shared stream or to one file per worker (`-o`). In
//! aggregate mode entries rows are collected into per-worker scratch
//! databases instead and only the final aggregate query is printed.

use crate::config::QueryConfig;
use crate::db::{open_readonly, query_rows, register_path_function, Aggregator};
use crate::error::{DbError, Result, TaskError, TaskResult};
use crate::output::OutputBuffers;
use crate::tasks::{list_dir, start_workers};
use crate::walker::pool::{QueuePool, Scheduler};
use crate::walker::queue::WorkItem;
use crate::walker::stats::{WalkCounters, WalkResult};
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared state of a query run
pub struct QueryContext<W: Write> {
    config: QueryConfig,

    /// Per-worker output buffers over the result stream
    pub out: OutputBuffers<W>,

    /// Directories visited, rows printed (or collected)
    pub counters: WalkCounters,

    /// Scratch databases, in aggregate mode
    aggregator: Option<Aggregator>,
}

impl<W: Write> QueryContext<W> {
    fn in_range(&self, level: usize) -> bool {
        level >= self.config.min_level && self.config.max_level.map_or(true, |max| level <= max)
    }
}

/// Query one directory and enqueue its subdirectories
pub fn query_dir<W>(
    scheduler: &Scheduler<WorkItem, QueryContext<W>>,
    id: usize,
    item: WorkItem,
    ctx: &QueryContext<W>,
) -> TaskResult
where
    W: Write + Send + 'static,
{
    if ctx.in_range(item.level) {
        let rows = query_local(id, &item, ctx)?;
        ctx.counters.add_dir();
        ctx.counters.add_files(rows, 0);
    }

    if !item.can_descend(ctx.config.max_level) {
        return Ok(());
    }

    for entry in list_dir(&item.path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry in '{}': {}", item.path.display(), e);
                ctx.counters.add_error();
                continue;
            }
        };
        if !entry.file_type().map_or(false, |ft| ft.is_dir()) {
            continue;
        }

        match item.child(entry.file_name()) {
            Ok(child) => scheduler.enqueue(id, query_dir::<W>, child),
            Err(e) => scheduler.record_pruned(&e),
        }
    }

    Ok(())
}

/// Run the configured queries against one directory; returns rows printed
fn query_local<W: Write>(id: usize, item: &WorkItem, ctx: &QueryContext<W>) -> std::result::Result<u64, TaskError> {
    let conn = match open_readonly(&item.path) {
        Ok(conn) => conn,
        Err(DbError::Missing { path }) => {
            debug!("No database at '{}', descending only", path.display());
            return Ok(0);
        }
        Err(e) => return Err(TaskError::db(&item.path, e)),
    };
    register_path_function(&conn, &item.path).map_err(|e| TaskError::db(&item.path, e))?;

    let delim = ctx.config.delimiter;
    let emit = |line: &str| ctx.out.println(id, line);
    let mut rows = 0;

    if let Some(sql) = &ctx.config.summary_sql {
        // aggregate mode only uses the summary query as a filter
        let found = match &ctx.aggregator {
            Some(_) => query_rows(&conn, sql, delim, |_| Ok(())),
            None => query_rows(&conn, sql, delim, emit),
        }
        .map_err(|e| TaskError::db(&item.path, e))?;
        if ctx.aggregator.is_none() {
            rows += found;
        }
        if ctx.config.and && found == 0 {
            return Ok(rows);
        }
    }

    if let Some(sql) = &ctx.config.entries_sql {
        rows += match &ctx.aggregator {
            Some(agg) => agg.collect(id, &conn, sql),
            None => query_rows(&conn, sql, delim, emit),
        }
        .map_err(|e| TaskError::db(&item.path, e))?;
    }

    Ok(rows)
}

/// Query the index, printing to stdout or to per-worker files
pub fn run(config: QueryConfig) -> Result<WalkResult> {
    let Some(prefix) = config.output_prefix.clone() else {
        return run_to(config, io::stdout());
    };

    let mut files = Vec::with_capacity(config.threads);
    for id in 0..config.threads {
        files.push(File::create(QueryConfig::output_path(&prefix, id))?);
    }
    let out = OutputBuffers::per_worker(config.buffer_size, files);
    run_with(config, out)
}

/// Query the index, printing to `sink`
pub fn run_to<W>(config: QueryConfig, sink: W) -> Result<WalkResult>
where
    W: Write + Send + 'static,
{
    let out = OutputBuffers::new(config.threads, config.buffer_size, sink);
    run_with(config, out)
}

fn run_with<W>(config: QueryConfig, out: OutputBuffers<W>) -> Result<WalkResult>
where
    W: Write + Send + 'static,
{
    let threads = config.threads;
    let roots = config.roots.clone();
    let aggregator = match &config.aggregate {
        Some(sql) => Some(Aggregator::create(threads, sql.clone())?),
        None => None,
    };
    let ctx = Arc::new(QueryContext {
        out,
        config,
        counters: WalkCounters::default(),
        aggregator,
    });

    let mut pool: QueuePool<WorkItem, QueryContext<W>> = QueuePool::new(threads)?;
    for (i, root) in roots.into_iter().enumerate() {
        pool.enqueue(i, query_dir::<W>, WorkItem::root(root));
    }

    let start = Instant::now();
    start_workers(&mut pool, Arc::clone(&ctx))?;
    pool.wait();

    if let Some(agg) = &ctx.aggregator {
        let printed = agg.finish(ctx.config.delimiter, |line| ctx.out.println(0, line))?;
        debug!("Aggregate query printed {} rows", printed);
    }

    ctx.out.flush_all()?;
    let result = WalkResult::from_counters(
        &ctx.counters,
        pool.tasks_failed(),
        pool.pruned(),
        pool.threads_started(),
        start.elapsed(),
    );
    pool.destroy();

    info!(
        "Queried {} directories, {} rows in {:.2}s",
        result.dirs,
        result.files,
        result.duration.as_secs_f64()
    );
    Ok(result)
}
