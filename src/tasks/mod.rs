//! Tree operations built on the task pool
//!
//! Every operation follows the same recipe: build a context, seed root
//! items, start the pool, wait, and turn the pool's counters plus the
//! context's counters into a report. Task functions do one node each and
//! enqueue their children onto their own worker's queue.

pub mod find;
pub mod gendir;
pub mod index;
pub mod query;
pub mod remove;
pub mod rollup;
pub mod trace;

use crate::error::{PoolError, PoolResult, TaskError};
use crate::walker::pool::QueuePool;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Start every worker of `pool`, failing if any of them could not be spawned
///
/// On failure the caller drops the pool, which shuts down the workers that
/// did start.
pub(crate) fn start_workers<W, C>(pool: &mut QueuePool<W, C>, context: Arc<C>) -> PoolResult<()>
where
    W: Send + 'static,
    C: Send + Sync + 'static,
{
    let requested = pool.thread_count();
    let started = pool.start(context);
    if started != requested {
        return Err(PoolError::PartialStart { started, requested });
    }
    Ok(())
}

/// `read_dir` with the error mapped to a task error
pub(crate) fn list_dir(path: &Path) -> Result<fs::ReadDir, TaskError> {
    fs::read_dir(path).map_err(|e| TaskError::io("open directory", path, e))
}
