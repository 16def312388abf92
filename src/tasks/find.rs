//! Parallel find over a live filesystem

use crate::config::FindConfig;
use crate::error::{Result, TaskError, TaskResult};
use crate::output::OutputBuffers;
use crate::tasks::{list_dir, start_workers};
use crate::walker::pool::{QueuePool, Scheduler};
use crate::walker::queue::WorkItem;
use crate::walker::stats::{WalkCounters, WalkResult};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared state of a find run
pub struct FindContext<W: Write> {
    config: FindConfig,
    pub out: OutputBuffers<W>,
    pub counters: WalkCounters,
}

impl<W: Write> FindContext<W> {
    /// Check the basename of `path` against `--name`
    fn matches(&self, path: &Path) -> bool {
        let Some(re) = &self.config.name else {
            return true;
        };
        match path.file_name() {
            Some(name) => re.is_match(&name.to_string_lossy()),
            None => re.is_match(&path.to_string_lossy()),
        }
    }

    fn print(&self, id: usize, path: &Path) -> io::Result<()> {
        if self.matches(path) {
            self.out.println(id, path.as_os_str().as_encoded_bytes())?;
        }
        Ok(())
    }
}

/// Print one directory and its entries, enqueueing subdirectories
pub fn find_dir<W>(
    scheduler: &Scheduler<WorkItem, FindContext<W>>,
    id: usize,
    item: WorkItem,
    ctx: &FindContext<W>,
) -> TaskResult
where
    W: Write + Send + 'static,
{
    let listing = list_dir(&item.path)?;
    ctx.print(id, &item.path).map_err(TaskError::Output)?;
    ctx.counters.add_dir();

    let descend = item.can_descend(ctx.config.max_depth);
    for entry in listing {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry in '{}': {}", item.path.display(), e);
                ctx.counters.add_error();
                continue;
            }
        };

        if entry.file_type().map_or(false, |ft| ft.is_dir()) {
            if descend {
                match item.child(entry.file_name()) {
                    Ok(child) => scheduler.enqueue(id, find_dir::<W>, child),
                    Err(e) => scheduler.record_pruned(&e),
                }
            }
            continue;
        }

        ctx.print(id, &entry.path()).map_err(TaskError::Output)?;
        ctx.counters.add_files(1, 0);
    }

    Ok(())
}

/// Run find, printing to stdout
pub fn run(config: FindConfig) -> Result<WalkResult> {
    run_to(config, io::stdout())
}

/// Run find, printing to `sink`
pub fn run_to<W>(config: FindConfig, sink: W) -> Result<WalkResult>
where
    W: Write + Send + 'static,
{
    let threads = config.threads;
    let paths = config.paths.clone();
    let ctx = Arc::new(FindContext {
        out: OutputBuffers::new(threads, config.buffer_size, sink),
        config,
        counters: WalkCounters::default(),
    });

    let mut pool: QueuePool<WorkItem, FindContext<W>> = QueuePool::new(threads)?;
    let mut next = 0;
    for path in paths {
        match fs::symlink_metadata(&path) {
            Ok(md) if md.is_dir() => {
                pool.enqueue(next, find_dir::<W>, WorkItem::root(path));
                next += 1;
            }
            Ok(_) => {
                ctx.print(0, &path)?;
                ctx.counters.add_files(1, 0);
            }
            Err(e) => {
                warn!("Cannot access '{}': {}", path.display(), e);
                ctx.counters.add_error();
            }
        }
    }

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
        "Found {} directories, {} entries in {:.2}s",
        result.dirs,
        result.files,
        result.duration.as_secs_f64()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use regex::Regex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sorted(sink: &SharedSink) -> Vec<String> {
        let text = String::from_utf8(sink.0.lock().clone()).unwrap();
        let mut lines: Vec<String> = text.lines().map(String::from).collect();
        lines.sort();
        lines
    }

    fn config(paths: Vec<std::path::PathBuf>) -> FindConfig {
        FindConfig {
            paths,
            threads: 3,
            buffer_size: 64,
            name: None,
            max_depth: None,
        }
    }

    #[test]
    fn test_find_prints_every_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("t");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("x"), b"").unwrap();
        fs::write(root.join("a/b/y"), b"").unwrap();

        let sink = SharedSink::default();
        let result = run_to(config(vec![root.clone()]), sink.clone()).unwrap();

        let r = root.display();
        assert_eq!(
            sorted(&sink),
            vec![
                format!("{r}"),
                format!("{r}/a"),
                format!("{r}/a/b"),
                format!("{r}/a/b/y"),
                format!("{r}/x"),
            ]
        );
        assert_eq!(result.dirs, 3);
        assert_eq!(result.files, 2);
    }

    #[test]
    fn test_name_filter_depth_and_odd_arguments() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("t");
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("keep.log"), b"").unwrap();
        fs::write(root.join("sub/also.log"), b"").unwrap();
        fs::write(root.join("sub/deeper/hidden.log"), b"").unwrap();
        fs::write(root.join("skip.txt"), b"").unwrap();

        let mut cfg = config(vec![
            root.clone(),
            root.join("skip.txt"),
            dir.path().join("missing"),
        ]);
        cfg.name = Some(Regex::new(r"\.(log|txt)$").unwrap());
        cfg.max_depth = Some(1);

        let sink = SharedSink::default();
        let result = run_to(cfg, sink.clone()).unwrap();

        let r = root.display();
        assert_eq!(
            sorted(&sink),
            vec![
                format!("{r}/keep.log"),
                format!("{r}/skip.txt"),
                format!("{r}/skip.txt"),
                format!("{r}/sub/also.log"),
            ]
        );
        assert_eq!(result.errors, 1);
    }
}
