//! Parallel removal of a real directory tree
//!
//! Going down, each directory unlinks its non-directory entries and
//! registers a token waiting on its subdirectories. Going up, a directory
//! is removed once every subdirectory under it is gone. The root goes last.

use crate::config::RemoveConfig;
use crate::error::{Result, TaskError, TaskResult};
use crate::tasks::{list_dir, start_workers};
use crate::walker::completion::{finish_node, release_parent, CompletionToken};
use crate::walker::pool::{QueuePool, Scheduler};
use crate::walker::queue::WorkItem;
use crate::walker::stats::{WalkCounters, WalkResult};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared state of an rmtree run
#[derive(Debug, Default)]
pub struct RemoveContext {
    /// Directories removed, files unlinked
    pub counters: WalkCounters,
}

/// Unlink the files of one directory and enqueue its subdirectories
pub fn remove_down(
    scheduler: &Scheduler<WorkItem, RemoveContext>,
    id: usize,
    item: WorkItem,
    ctx: &RemoveContext,
) -> TaskResult {
    let listing = match list_dir(&item.path) {
        Ok(listing) => listing,
        Err(e) => {
            release_parent(scheduler, id, item.completion.as_ref(), &(), remove_up);
            if e.is_not_found() {
                debug!("'{}' vanished before removal", item.path.display());
                return Ok(());
            }
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

        let path = entry.path();
        if entry.file_type().map_or(false, |ft| ft.is_dir()) {
            match item.child(entry.file_name()) {
                Ok(child) => children.push(child),
                Err(e) => scheduler.record_pruned(&e),
            }
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => ctx.counters.add_files(1, 0),
            Err(e) => {
                warn!("Failed to unlink '{}': {}", path.display(), e);
                ctx.counters.add_error();
            }
        }
    }

    let token = CompletionToken::new(&item.path, item.level, children.len(), (), item.completion);
    if children.is_empty() {
        scheduler.enqueue(id, remove_up, WorkItem::for_token(token));
        return Ok(());
    }

    for child in children {
        scheduler.enqueue(id, remove_down, child.with_completion(Arc::clone(&token)));
    }
    Ok(())
}

/// Remove a directory whose subdirectories are all gone
pub fn remove_up(
    scheduler: &Scheduler<WorkItem, RemoveContext>,
    id: usize,
    item: WorkItem,
    ctx: &RemoveContext,
) -> TaskResult {
    let Some(token) = item.completion else {
        return Ok(());
    };

    finish_node(scheduler, id, &token, remove_up, |token, _| {
        fs::remove_dir(token.path()).map_err(|e| TaskError::io("remove directory", token.path(), e))?;
        debug!("Removed '{}'", token.path().display());
        ctx.counters.add_dir();
        Ok(())
    })
}

/// Remove `config.root` and everything under it
pub fn run(config: RemoveConfig) -> Result<WalkResult> {
    let ctx = Arc::new(RemoveContext::default());

    let mut pool: QueuePool<WorkItem, RemoveContext> = QueuePool::new(config.threads)?;
    pool.enqueue(0, remove_down, WorkItem::root(&config.root));

    let start = Instant::now();
    start_workers(&mut pool, Arc::clone(&ctx))?;
    pool.wait();

    let result = WalkResult::from_counters(
        &ctx.counters,
        pool.tasks_failed(),
        pool.pruned(),
        pool.threads_started(),
        start.elapsed(),
    );
    pool.destroy();

    info!(
        "Removed {} directories, {} files under '{}' in {:.2}s",
        result.dirs,
        result.files,
        config.root.display(),
        result.duration.as_secs_f64()
    );
    Ok(result)
}
