//! Bottom-up subtree totals over an index
//!
//! `rollup_down` reads a directory's summary row and registers a token
//! waiting on its subdirectories. `rollup_up` runs once the whole subtree
//! has reported in, prints the cumulative totals and passes them to the
//! parent, so every directory is printed after all of its descendants.

use crate::config::RollupConfig;
use crate::db::{open_readonly, read_summary_totals};
use crate::error::{DbError, Result, TaskError, TaskResult};
use crate::output::OutputBuffers;
use crate::tasks::{list_dir, start_workers};
use crate::walker::completion::{finish_node, release_parent, CompletionToken, Rollup};
use crate::walker::pool::{QueuePool, Scheduler};
use crate::walker::queue::WorkItem;
use crate::walker::stats::{WalkCounters, WalkResult};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Files and bytes under a directory, itself included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtreeTotals {
    pub files: u64,
    pub bytes: u64,
}

impl Rollup for SubtreeTotals {
    fn absorb(&mut self, child: &Self) {
        self.files += child.files;
        self.bytes += child.bytes;
    }
}

type Item = WorkItem<SubtreeTotals>;

/// Shared state of a rollup run
pub struct RollupContext<W: Write> {
    config: RollupConfig,
    pub out: OutputBuffers<W>,
    pub counters: WalkCounters,
}

/// This directory's own totals; a directory without a database counts as empty
fn local_totals<W: Write>(dir: &Path, ctx: &RollupContext<W>) -> SubtreeTotals {
    let totals = open_readonly(dir).and_then(|conn| read_summary_totals(&conn));
    match totals {
        Ok(t) => SubtreeTotals {
            files: t.files + t.links,
            bytes: t.bytes,
        },
        Err(DbError::Missing { .. }) => SubtreeTotals::default(),
        Err(e) => {
            warn!("Failed to read summary in '{}': {}", dir.display(), e);
            ctx.counters.add_error();
            SubtreeTotals::default()
        }
    }
}

/// Register a directory and enqueue its subdirectories
pub fn rollup_down<W>(
    scheduler: &Scheduler<Item, RollupContext<W>>,
    id: usize,
    item: Item,
    ctx: &RollupContext<W>,
) -> TaskResult
where
    W: Write + Send + 'static,
{
    let listing = match list_dir(&item.path) {
        Ok(listing) => listing,
        Err(e) => {
            release_parent(
                scheduler,
                id,
                item.completion.as_ref(),
                &SubtreeTotals::default(),
                rollup_up::<W>,
            );
            return Err(e);
        }
    };

    let mut children = Vec::new();
    for entry in listing {
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
            Ok(child) => children.push(child),
            Err(e) => scheduler.record_pruned(&e),
        }
    }

    let local = local_totals(&item.path, ctx);
    ctx.counters.add_dir();
    ctx.counters.add_files(local.files, local.bytes);

    let token = CompletionToken::new(
        &item.path,
        item.level,
        children.len(),
        local,
        item.completion,
    );
    if children.is_empty() {
        scheduler.enqueue(id, rollup_up::<W>, WorkItem::for_token(token));
        return Ok(());
    }

    for child in children {
        scheduler.enqueue(id, rollup_down::<W>, child.with_completion(Arc::clone(&token)));
    }
    Ok(())
}

/// Print a finished subtree and report it to the parent
pub fn rollup_up<W>(
    scheduler: &Scheduler<Item, RollupContext<W>>,
    id: usize,
    item: Item,
    ctx: &RollupContext<W>,
) -> TaskResult
where
    W: Write + Send + 'static,
{
    let Some(token) = item.completion else {
        return Ok(());
    };

    finish_node(scheduler, id, &token, rollup_up::<W>, |token, total| {
        let d = ctx.config.delimiter;
        debug!("Subtree '{}' complete", token.path().display());
        ctx.out
            .println(
                id,
                format!("{}{d}{}{d}{}", token.path().display(), total.files, total.bytes),
            )
            .map_err(TaskError::Output)?;
        // the parent is released after this returns; its line must not
        // overtake ours from another buffer
        ctx.out.flush(id).map_err(TaskError::Output)?;
        Ok(())
    })
}

/// Roll up the index, printing to stdout
pub fn run(config: RollupConfig) -> Result<WalkResult> {
    run_to(config, io::stdout())
}

/// Roll up the index, printing to `sink`
pub fn run_to<W>(config: RollupConfig, sink: W) -> Result<WalkResult>
where
    W: Write + Send + 'static,
{
    let threads = config.threads;
    let root = config.index_root.clone();
    let ctx = Arc::new(RollupContext {
        out: OutputBuffers::new(threads, config.buffer_size, sink),
        config,
        counters: WalkCounters::default(),
    });

    let mut pool: QueuePool<Item, RollupContext<W>> = QueuePool::new(threads)?;
    pool.enqueue(0, rollup_down::<W>, WorkItem::root(root));

    let start = Instant::now();
    start_workers(&mut pool, Arc::clone(&ctx))?;
    pool.wait();

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
        "Rolled up {} directories, {} files in {:.2}s",
        result.dirs,
        result.files,
        result.duration.as_secs_f64()
    );
    Ok(result)
}
