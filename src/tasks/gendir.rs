//! Synthetic tree benchmark
//!
//! Builds a tree of `depth` levels with `branching` subdirectories (`d.<i>`)
//! and `files` files (`f.<i>`) per directory, then stats and removes it.
//! Every phase is its own walk over the synthetic names, run on one pool
//! that is restarted between phases:
//!
//! ```text
//! per iteration:  mkdir ─► create files ─► stat dirs ─► stat files ─► unlink ─► rmdir
//!                                                                              (bottom-up)
//! ```
//!
//! Each worker keeps its own timing table; tables are merged at the end.
//! The root itself is created up front and never removed.

use crate::config::GenConfig;
use crate::error::{Result, TaskError, TaskResult};
use crate::tasks::start_workers;
use crate::walker::completion::{finish_node, CompletionToken};
use crate::walker::pool::{QueuePool, Scheduler, TaskFn};
use crate::walker::queue::WorkItem;
use parking_lot::Mutex;
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Timed metadata operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Mkdir,
    Open,
    Close,
    Mknod,
    StatDir,
    StatFile,
    RmDir,
    RmFile,
}

const OP_COUNT: usize = 8;

impl Op {
    /// Label used in the timing table
    pub fn name(&self) -> &'static str {
        match self {
            Op::Mkdir => "mkdir",
            Op::Open => "open",
            Op::Close => "close",
            Op::Mknod => "mknod",
            Op::StatDir => "stat (dir)",
            Op::StatFile => "stat (file)",
            Op::RmDir => "rmdir",
            Op::RmFile => "rm (file)",
        }
    }
}

/// Timing totals for one operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpStat {
    pub count: u64,

    /// Sum of every call's duration, in seconds
    pub secs: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for OpStat {
    fn default() -> Self {
        Self {
            count: 0,
            secs: 0.0,
            min: f64::INFINITY,
            max: 0.0,
        }
    }
}

impl OpStat {
    fn add(&mut self, secs: f64) {
        self.count += 1;
        self.secs += secs;
        self.min = self.min.min(secs);
        self.max = self.max.max(secs);
    }

    fn merge(&mut self, other: &OpStat) {
        self.count += other.count;
        self.secs += other.secs;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Fastest call, or 0 if there were none
    pub fn min_secs(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }
}

/// One row of the timing table
#[derive(Debug, Clone, Copy)]
pub struct OpRow {
    pub op: Op,
    pub stat: OpStat,

    /// Wall-clock time of the phases that ran this operation
    pub realtime: Duration,
}

/// Outcome of a gendir run
#[derive(Debug, Clone)]
pub struct GenReport {
    /// Rows for the operations that ran, in phase order
    pub rows: Vec<OpRow>,
    pub expected_dirs: u64,
    pub expected_files: u64,

    /// Tasks that failed
    pub failed: u64,
    pub pruned: u64,
    pub threads: u64,
    pub duration: Duration,
}

impl GenReport {
    /// Calls made of `op`, 0 if it did not run
    pub fn count(&self, op: Op) -> u64 {
        self.rows
            .iter()
            .find(|row| row.op == op)
            .map_or(0, |row| row.stat.count)
    }
}

/// Shared state of a gendir run
pub struct GenContext {
    config: GenConfig,

    /// One timing table per worker
    stats: Vec<Mutex<[OpStat; OP_COUNT]>>,
}

impl GenContext {
    fn new(config: GenConfig) -> Self {
        let stats = (0..config.threads)
            .map(|_| Mutex::new([OpStat::default(); OP_COUNT]))
            .collect();
        Self { config, stats }
    }

    fn timed<T>(&self, id: usize, op: Op, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        let start = Instant::now();
        let result = f();
        let secs = start.elapsed().as_secs_f64();
        self.stats[id % self.stats.len()].lock()[op as usize].add(secs);
        result
    }

    fn merged(&self) -> [OpStat; OP_COUNT] {
        let mut all = [OpStat::default(); OP_COUNT];
        for table in &self.stats {
            let table = table.lock();
            for (total, stat) in all.iter_mut().zip(table.iter()) {
                total.merge(stat);
            }
        }
        all
    }
}

type GenScheduler = Scheduler<WorkItem, GenContext>;

/// Items for the subdirectories of `item`, empty at the last level
fn subdirs(scheduler: &GenScheduler, item: &WorkItem, ctx: &GenContext) -> Vec<WorkItem> {
    if item.level + 1 >= ctx.config.depth {
        return Vec::new();
    }
    (0..ctx.config.branching)
        .filter_map(|i| match item.child(format!("d.{}", i)) {
            Ok(child) => Some(child),
            Err(e) => {
                scheduler.record_pruned(&e);
                None
            }
        })
        .collect()
}

fn enqueue_subdirs(scheduler: &GenScheduler, id: usize, item: &WorkItem, ctx: &GenContext, func: TaskFn<WorkItem, GenContext>) {
    for child in subdirs(scheduler, item, ctx) {
        scheduler.enqueue(id, func, child);
    }
}

fn enqueue_files(scheduler: &GenScheduler, id: usize, item: &WorkItem, ctx: &GenContext, func: TaskFn<WorkItem, GenContext>) {
    for i in 0..ctx.config.files {
        match item.child(format!("f.{}", i)) {
            Ok(file) => scheduler.enqueue(id, func, file),
            Err(e) => scheduler.record_pruned(&e),
        }
    }
}

/// Create one directory, then its subdirectories
pub fn create_dir(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    let made = ctx.timed(id, Op::Mkdir, || fs::create_dir(&item.path));
    match made {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(TaskError::io("create directory", &item.path, e)),
    }

    enqueue_subdirs(scheduler, id, &item, ctx, create_dir);
    Ok(())
}

/// Enqueue file creation for one directory, then walk on
pub fn create_files(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    enqueue_files(scheduler, id, &item, ctx, create_file);
    enqueue_subdirs(scheduler, id, &item, ctx, create_files);
    Ok(())
}

/// Create one file with open/close or mknod
pub fn create_file(_scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    if ctx.config.mknod {
        return match ctx.timed(id, Op::Mknod, || mknod_regular(&item.path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(TaskError::io("mknod", &item.path, e)),
        };
    }

    let file = ctx
        .timed(id, Op::Open, || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o644)
                .open(&item.path)
        })
        .map_err(|e| TaskError::io("open", &item.path, e))?;

    ctx.timed(id, Op::Close, || {
        drop(file);
        Ok(())
    })
    .map_err(|e| TaskError::io("close", &item.path, e))
}

fn mknod_regular(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string that outlives the call
    let rc = unsafe { libc::mknod(c_path.as_ptr(), libc::S_IFREG | 0o644, 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Stat one directory, then its subdirectories
pub fn stat_dir(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    ctx.timed(id, Op::StatDir, || fs::symlink_metadata(&item.path))
        .map_err(|e| TaskError::io("stat", &item.path, e))?;

    enqueue_subdirs(scheduler, id, &item, ctx, stat_dir);
    Ok(())
}

/// Enqueue a stat for every file of one directory, then walk on
pub fn stat_files(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    enqueue_files(scheduler, id, &item, ctx, stat_file);
    enqueue_subdirs(scheduler, id, &item, ctx, stat_files);
    Ok(())
}

/// Stat one file
pub fn stat_file(_scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    ctx.timed(id, Op::StatFile, || fs::symlink_metadata(&item.path))
        .map(|_| ())
        .map_err(|e| TaskError::io("stat", &item.path, e))
}

/// Enqueue an unlink for every file of one directory, then walk on
pub fn remove_files(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    enqueue_files(scheduler, id, &item, ctx, remove_file);
    enqueue_subdirs(scheduler, id, &item, ctx, remove_files);
    Ok(())
}

/// Unlink one file
pub fn remove_file(_scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    ctx.timed(id, Op::RmFile, || fs::remove_file(&item.path))
        .map_err(|e| TaskError::io("remove file", &item.path, e))
}

/// Register a directory for removal and descend
pub fn remove_down(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    let children = subdirs(scheduler, &item, ctx);
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

/// Remove a directory once its subdirectories are gone; the root is kept
pub fn remove_up(scheduler: &GenScheduler, id: usize, item: WorkItem, ctx: &GenContext) -> TaskResult {
    let Some(token) = item.completion else {
        return Ok(());
    };

    finish_node(scheduler, id, &token, remove_up, |token, _| {
        if token.level() == 0 {
            return Ok(());
        }
        ctx.timed(id, Op::RmDir, || fs::remove_dir(token.path()))
            .map_err(|e| TaskError::io("remove directory", token.path(), e))
    })
}

/// Walk the synthetic tree once with `func`; returns the phase's wall time
fn run_phase(
    pool: &mut QueuePool<WorkItem, GenContext>,
    ctx: &Arc<GenContext>,
    func: TaskFn<WorkItem, GenContext>,
) -> Result<Duration> {
    pool.enqueue(0, func, WorkItem::root(&ctx.config.root));

    let start = Instant::now();
    start_workers(pool, Arc::clone(ctx))?;
    pool.wait();
    Ok(start.elapsed())
}

/// Run the configured phases for every iteration
pub fn run(config: GenConfig) -> Result<GenReport> {
    fs::create_dir_all(&config.root)?;

    let ctx = Arc::new(GenContext::new(config));
    let cfg = &ctx.config;
    let has_files = cfg.files > 0;
    let file_ops: &[Op] = if cfg.mknod { &[Op::Mknod] } else { &[Op::Open, Op::Close] };

    let mut phases: Vec<(TaskFn<WorkItem, GenContext>, &[Op])> = Vec::new();
    if cfg.create {
        phases.push((create_dir, &[Op::Mkdir]));
        if has_files {
            phases.push((create_files, file_ops));
        }
    }
    if cfg.stat {
        phases.push((stat_dir, &[Op::StatDir]));
        if has_files {
            phases.push((stat_files, &[Op::StatFile]));
        }
    }
    if cfg.remove {
        if has_files {
            phases.push((remove_files, &[Op::RmFile]));
        }
        phases.push((remove_down, &[Op::RmDir]));
    }

    info!(
        "Generating under '{}': {} phases x {} iterations",
        cfg.root.display(),
        phases.len(),
        cfg.iterations
    );

    let mut pool: QueuePool<WorkItem, GenContext> = QueuePool::new(cfg.threads)?;
    let mut realtime = vec![Duration::ZERO; phases.len()];
    let start = Instant::now();

    for iteration in 0..cfg.iterations {
        for (phase, (func, _)) in phases.iter().enumerate() {
            realtime[phase] += run_phase(&mut pool, &ctx, *func)?;
        }
        debug!("Iteration {} done", iteration);
    }

    let duration = start.elapsed();
    let all = ctx.merged();
    let mut rows = Vec::new();
    for ((_, ops), real) in phases.iter().zip(&realtime) {
        for op in ops.iter() {
            rows.push(OpRow {
                op: *op,
                stat: all[*op as usize],
                realtime: *real,
            });
        }
    }

    let report = GenReport {
        rows,
        expected_dirs: cfg.expected_dirs(),
        expected_files: cfg.expected_files(),
        failed: pool.tasks_failed(),
        pruned: pool.pruned(),
        threads: pool.threads_started(),
        duration,
    };
    pool.destroy();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tree_dir_count;
    use tempfile::tempdir;

    fn config(root: &Path, branching: usize, depth: usize, files: usize) -> GenConfig {
        GenConfig {
            root: root.to_path_buf(),
            threads: 3,
            branching,
            depth,
            files,
            create: true,
            stat: true,
            remove: true,
            iterations: 1,
            mknod: false,
            dirs_per_iteration: tree_dir_count(branching, depth).unwrap(),
            show_header: true,
        }
    }

    #[test]
    fn test_full_cycle_leaves_empty_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gen");
        let report = run(config(&root, 2, 3, 1)).unwrap();

        assert_eq!(report.expected_dirs, 7);
        assert_eq!(report.expected_files, 7);
        assert_eq!(report.count(Op::Mkdir), 7);
        assert_eq!(report.count(Op::Open), 7);
        assert_eq!(report.count(Op::Close), 7);
        assert_eq!(report.count(Op::StatDir), 7);
        assert_eq!(report.count(Op::StatFile), 7);
        assert_eq!(report.count(Op::RmFile), 7);
        assert_eq!(report.count(Op::RmDir), 6);
        assert_eq!(report.count(Op::Mknod), 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.threads, 18);

        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_create_only_with_mknod() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gen");
        let mut cfg = config(&root, 3, 2, 2);
        cfg.stat = false;
        cfg.remove = false;
        cfg.mknod = true;
        cfg.iterations = 2;
        cfg.dirs_per_iteration = 4;

        let report = run(cfg).unwrap();

        // second iteration finds everything in place
        assert_eq!(report.count(Op::Mkdir), 8);
        assert_eq!(report.count(Op::Mknod), 16);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.failed, 0);

        for d in ["", "d.0", "d.1", "d.2"] {
            for f in ["f.0", "f.1"] {
                assert!(root.join(d).join(f).is_file(), "{}/{} missing", d, f);
            }
        }
        assert!(!root.join("d.0/d.0").exists());
    }

    #[test]
    fn test_op_stat_merge() {
        let mut a = OpStat::default();
        assert_eq!(a.min_secs(), 0.0);
        a.add(2.0);
        let mut b = OpStat::default();
        b.add(1.0);
        b.add(4.0);
        a.merge(&b);

        assert_eq!(a.count, 3);
        assert_eq!(a.secs, 7.0);
        assert_eq!(a.min_secs(), 1.0);
        assert_eq!(a.max, 4.0);
    }
}
