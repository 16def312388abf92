//! Index a source tree into a mirrored tree of per-directory databases
//!
//! `index_dir` handles one directory: it creates the mirror directory,
//! copies the template database into it, inserts every file and symlink
//! plus a summary row, and only then enqueues the subdirectories.

use crate::config::IndexConfig;
use crate::db::{write_directory, TemplateDb, DB_NAME};
use crate::entry::{DirSummary, EntryMeta, EntryRecord};
use crate::error::{IndexError, Result, TaskError, TaskResult};
use crate::tasks::{list_dir, start_workers};
use crate::walker::pool::{QueuePool, Scheduler};
use crate::walker::queue::WorkItem;
use crate::walker::stats::{WalkCounters, WalkProgress, WalkResult};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared state of an index run
pub struct IndexContext {
    config: IndexConfig,

    /// Paths in the index are relative to this
    source_parent: PathBuf,

    template: TemplateDb,

    /// Live counters
    pub counters: WalkCounters,
}

impl IndexContext {
    /// Build the context, including the template database
    pub fn new(config: IndexConfig) -> Result<Self> {
        let template = TemplateDb::create()?;
        let source_parent = config
            .source
            .parent()
            .unwrap_or(&config.source)
            .to_path_buf();

        Ok(Self {
            config,
            source_parent,
            template,
            counters: WalkCounters::default(),
        })
    }

    /// Where `dir` (under the source) lives in the index
    pub fn mirror_path(&self, dir: &Path) -> std::result::Result<PathBuf, TaskError> {
        let rel = dir
            .strip_prefix(&self.source_parent)
            .map_err(|_| TaskError::OutsideRoot {
                path: dir.to_path_buf(),
                root: self.source_parent.clone(),
            })?;
        Ok(self.config.index_root.join(rel))
    }
}

/// Index one directory and enqueue its subdirectories
pub fn index_dir(
    scheduler: &Scheduler<WorkItem, IndexContext>,
    id: usize,
    item: WorkItem,
    ctx: &IndexContext,
) -> TaskResult {
    let meta = match &item.meta {
        Some(meta) => meta.clone(),
        None => fs::symlink_metadata(&item.path)
            .map(|md| EntryMeta::from_metadata(&md))
            .map_err(|e| TaskError::io("stat", &item.path, e))?,
    };
    let listing = list_dir(&item.path)?;

    let mirror = ctx.mirror_path(&item.path)?;
    make_mirror_dir(&mirror, &meta)?;

    let descend = item.can_descend(ctx.config.max_depth);
    let mut summary = DirSummary::default();
    let mut records = Vec::new();
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
        let path_str = path.to_string_lossy();
        if ctx.config.is_excluded(&path_str) {
            debug!("Excluded '{}'", path_str);
            continue;
        }

        let entry_meta = match fs::symlink_metadata(&path) {
            Ok(md) => EntryMeta::from_metadata(&md),
            Err(e) => {
                warn!("Failed to stat '{}': {}", path_str, e);
                ctx.counters.add_error();
                continue;
            }
        };
        let kind = entry_meta.entry_type();
        summary.add_entry(kind, &entry_meta);

        if kind.is_dir() {
            if descend {
                match item.child(entry.file_name()) {
                    Ok(child) => children.push(child.with_meta(entry_meta)),
                    Err(e) => scheduler.record_pruned(&e),
                }
            }
            continue;
        }
        if !kind.is_indexed() {
            continue;
        }

        let mut record = EntryRecord::new(path_str.into_owned(), entry_meta);
        if kind.is_symlink() {
            match fs::read_link(&path) {
                Ok(target) => record.linkname = target.to_string_lossy().into_owned(),
                Err(e) => debug!("Failed to read link '{}': {}", path.display(), e),
            }
        }
        records.push(record);
    }

    let db_path = mirror.join(DB_NAME);
    ctx.template
        .copy_to(&db_path)
        .map_err(|e| TaskError::db(&db_path, e))?;

    let dir_record = EntryRecord::new(item.path.to_string_lossy(), meta);
    write_directory(&db_path, &dir_record, &summary, item.level, &records)
        .map_err(|e| TaskError::db(&db_path, e))?;

    ctx.counters.add_dir();
    ctx.counters.add_files(summary.files + summary.links, summary.bytes);
    debug!(
        "Worker {}: indexed '{}' ({} rows, {} subdirs)",
        id,
        item.path.display(),
        records.len(),
        children.len()
    );

    for child in children {
        scheduler.enqueue(id, index_dir, child);
    }

    Ok(())
}

/// Create the mirror of a source directory, copying mode and owner best-effort
fn make_mirror_dir(mirror: &Path, meta: &EntryMeta) -> TaskResult {
    // Owner bits stay writable so the database can be created inside
    match DirBuilder::new()
        .mode(meta.permissions() | 0o700)
        .create(mirror)
    {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && mirror.is_dir() => {}
        Err(e) => return Err(TaskError::io("create directory", mirror, e)),
    }

    if let Err(e) = std::os::unix::fs::chown(mirror, Some(meta.uid), Some(meta.gid)) {
        debug!("Could not set owner of '{}': {}", mirror.display(), e);
    }
    Ok(())
}

/// Index `config.source` into `config.index_root`
pub fn run(config: IndexConfig) -> Result<WalkResult> {
    run_with_progress(config, |_| {})
}

/// Index with a callback fed live counters every 100ms
pub fn run_with_progress<F>(config: IndexConfig, progress_callback: F) -> Result<WalkResult>
where
    F: Fn(WalkProgress) + Send,
{
    let threads = config.threads;
    fs::create_dir_all(&config.index_root).map_err(IndexError::Io)?;

    let source = config.source.clone();
    let ctx = Arc::new(IndexContext::new(config)?);
    info!(
        "Indexing '{}' into '{}' with {} threads",
        source.display(),
        ctx.config.index_root.display(),
        threads
    );

    let mut pool: QueuePool<WorkItem, IndexContext> = QueuePool::new(threads)?;
    pool.enqueue(0, index_dir, WorkItem::root(source));

    let start = Instant::now();
    let done = AtomicBool::new(false);
    let counters = &ctx.counters;

    thread::scope(|s| -> Result<()> {
        let done = &done;
        let monitor = thread::Builder::new()
            .name("progress".to_string())
            .spawn_scoped(s, move || {
                while !done.load(Ordering::Relaxed) {
                    progress_callback(counters.progress(start.elapsed()));
                    thread::sleep(Duration::from_millis(100));
                }
            });
        if let Err(e) = &monitor {
            warn!("Progress display unavailable: {}", e);
        }

        let started = start_workers(&mut pool, Arc::clone(&ctx));
        if started.is_ok() {
            pool.wait();
        }
        done.store(true, Ordering::Relaxed);
        started.map_err(IndexError::from)
    })?;

    let result = WalkResult::from_counters(
        &ctx.counters,
        pool.tasks_failed(),
        pool.pruned(),
        pool.threads_started(),
        start.elapsed(),
    );
    pool.destroy();

    info!(
        "Indexed {} directories, {} entries in {:.2}s",
        result.dirs,
        result.files,
        result.duration.as_secs_f64()
    );
    Ok(result)
}
