//! Build an index from a trace file
//!
//! Each unit handed out by the scout becomes one directory of the index:
//! the mirror directory is created, the template database copied in, and
//! the unit's records inserted with a summary row. Units may arrive out of
//! order across consumers, so mirror directories are created with all of
//! their missing parents.

use crate::config::TraceConfig;
use crate::db::{write_directory, TemplateDb, DB_NAME};
use crate::entry::{DirSummary, EntryRecord};
use crate::error::{IndexError, Result, TaskError, TaskResult, TraceResult};
use crate::trace::scout::{find_delim, trim_newline};
use crate::trace::{distribute, ConsumerStats, ScoutStats, TraceUnit};
use crate::walker::stats::WalkCounters;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared state of a trace replay
pub struct TraceContext {
    index_root: PathBuf,
    template: TemplateDb,

    /// Components in the first directory's name; depth is measured from it
    root_components: usize,

    /// Directories written, entries inserted
    pub counters: WalkCounters,
}

impl TraceContext {
    /// Build the context, including the template database
    pub fn new(index_root: PathBuf, root_components: usize) -> Result<Self> {
        Ok(Self {
            index_root,
            template: TemplateDb::create()?,
            root_components,
            counters: WalkCounters::default(),
        })
    }

    /// Where a traced directory lives in the index
    pub fn mirror_path(&self, name: impl AsRef<Path>) -> std::result::Result<PathBuf, TaskError> {
        let name = name.as_ref();
        let rel = name.strip_prefix("/").unwrap_or(name);
        if rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(TaskError::OutsideRoot {
                path: name.to_path_buf(),
                root: self.index_root.clone(),
            });
        }
        Ok(self.index_root.join(rel))
    }

    fn depth(&self, name: &Path) -> usize {
        component_count(name).saturating_sub(self.root_components)
    }

    /// Write one unit's directory database
    pub fn write_unit(&self, id: usize, unit: &TraceUnit, dir: EntryRecord, entries: Vec<EntryRecord>) -> TaskResult {
        // the raw name, not the lossy record name: mirrors must not collide
        let mirror = self.mirror_path(unit.name())?;
        fs::create_dir_all(&mirror).map_err(|e| TaskError::io("create directory", &mirror, e))?;
        let mode = dir.meta.permissions() | 0o700;
        if let Err(e) = fs::set_permissions(&mirror, fs::Permissions::from_mode(mode)) {
            debug!("Could not set mode of '{}': {}", mirror.display(), e);
        }

        let mut summary = DirSummary::default();
        for entry in &entries {
            summary.add_entry(entry.kind, &entry.meta);
        }

        let db_path = mirror.join(DB_NAME);
        self.template
            .copy_to(&db_path)
            .map_err(|e| TaskError::db(&db_path, e))?;
        let rows = write_directory(&db_path, &dir, &summary, self.depth(unit.name()), &entries)
            .map_err(|e| TaskError::db(&db_path, e))?;

        self.counters.add_dir();
        self.counters.add_files(summary.files + summary.links, summary.bytes);
        debug!(
            "Consumer {}: wrote {} of {} rows for '{}'",
            id,
            rows,
            unit.entries,
            unit.name().display()
        );
        Ok(())
    }
}

fn component_count(name: &Path) -> usize {
    name.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// Outcome of a trace replay
#[derive(Debug)]
pub struct TraceReport {
    /// What the scout saw; an error means the trace was unusable
    pub scout: TraceResult<ScoutStats>,

    /// Consumer counters summed over every consumer
    pub consumers: ConsumerStats,

    /// Directories written
    pub dirs: u64,

    /// Entries inserted
    pub files: u64,
    pub bytes: u64,
    pub duration: Duration,
}

/// Name of the first record, used as the depth origin
fn first_dir_name(trace: &Path, delim: char) -> Option<PathBuf> {
    let file = File::open(trace).ok()?;
    let mut raw = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut raw).ok()?;

    let mut delim_buf = [0u8; 4];
    let line = trim_newline(&raw);
    let end = find_delim(line, delim.encode_utf8(&mut delim_buf).as_bytes())?;
    Some(PathBuf::from(OsStr::from_bytes(&line[..end])))
}

/// Replay `config.trace` into `config.index_root`
pub fn run(config: TraceConfig) -> Result<TraceReport> {
    fs::create_dir_all(&config.index_root).map_err(IndexError::Io)?;

    let root_components = first_dir_name(&config.trace, config.delimiter)
        .map_or(0, |name| component_count(&name));
    let ctx = TraceContext::new(config.index_root.clone(), root_components)?;

    info!(
        "Replaying '{}' into '{}' with {} consumers",
        config.trace.display(),
        config.index_root.display(),
        config.threads
    );

    let start = Instant::now();
    let report = distribute(&config.trace, config.delimiter, config.threads, |id, unit, dir, entries| {
        ctx.write_unit(id, unit, dir, entries)
    })?;
    let duration = start.elapsed();

    if let Err(e) = &report.scout {
        warn!("Scout failed: {}", e);
    }

    let progress = ctx.counters.progress(duration);
    Ok(TraceReport {
        consumers: report.totals(),
        scout: report.scout,
        dirs: progress.dirs,
        files: progress.files,
        bytes: progress.bytes,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;
    use crate::trace::{format_record, DEFAULT_DELIMITER};
    use crate::entry::EntryMeta;
    use rusqlite::Connection;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn record(name: &str, mode: u32, size: u64) -> String {
        format_record(
            &EntryRecord::new(
                name,
                EntryMeta {
                    mode,
                    size,
                    ..Default::default()
                },
            ),
            DEFAULT_DELIMITER,
        )
    }

    fn trace_file(lines: &[String]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn config(trace: &Path, index_root: &Path) -> TraceConfig {
        TraceConfig {
            trace: trace.to_path_buf(),
            index_root: index_root.to_path_buf(),
            threads: 3,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    #[test]
    fn test_replay_builds_index() {
        let trace = trace_file(&[
            record("/data", 0o040755, 0),
            record("/data/a.txt", 0o100644, 10),
            record("/data/b.txt", 0o100644, 20),
            record("/data/sub", 0o040750, 0),
            record("/data/sub/c.bin", 0o100600, 300),
            record("/data/empty", 0o040700, 0),
        ]);
        let dir = tempdir().unwrap();
        let idx = dir.path().join("idx");

        let report = run(config(trace.path(), &idx)).unwrap();

        let scout = report.scout.as_ref().unwrap();
        assert_eq!(scout.dirs, 3);
        assert_eq!(scout.files, 3);
        assert_eq!(scout.empty_dirs, 1);
        assert_eq!(report.consumers.units, 3);
        assert_eq!(report.consumers.records, 3);
        assert_eq!(report.dirs, 3);
        assert_eq!(report.files, 3);
        assert_eq!(report.bytes, 330);

        let conn = Connection::open(idx.join("data").join(DB_NAME)).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let conn = Connection::open(idx.join("data/sub").join(DB_NAME)).unwrap();
        let (name, depth): (String, i64) = conn
            .query_row("SELECT name, depth FROM summary", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "sub");
        assert_eq!(depth, 1);
        assert!(idx.join("data/empty").join(DB_NAME).is_file());
    }

    #[test]
    fn test_empty_trace_reports_scout_error() {
        let trace = trace_file(&[]);
        let dir = tempdir().unwrap();
        let report = run(config(trace.path(), &dir.path().join("idx"))).unwrap();

        assert!(matches!(report.scout, Err(TraceError::Empty { .. })));
        assert_eq!(report.consumers.units, 0);
        assert_eq!(report.dirs, 0);
    }

    #[test]
    fn test_mirror_path_rejects_parent_components() {
        let ctx = TraceContext::new(PathBuf::from("/idx"), 1).unwrap();
        assert_eq!(ctx.mirror_path("/data/x").unwrap(), PathBuf::from("/idx/data/x"));
        assert!(matches!(
            ctx.mirror_path("/data/../../etc"),
            Err(TaskError::OutsideRoot { .. })
        ));
        assert_eq!(ctx.depth(Path::new("/data/x/y")), 2);
    }

    #[test]
    fn test_non_utf8_directories_get_their_own_mirrors() {
        let mut raw = Vec::new();
        for (name, line) in [
            (&b"/n\xfe"[..], record("", 0o040755, 0)),
            (&b"/n\xfe/\xfe"[..], record("", 0o040755, 0)),
            (&b"/n\xfe/\xfe/a"[..], record("", 0o100644, 1)),
            (&b"/n\xfe/\xff"[..], record("", 0o040755, 0)),
            (&b"/n\xfe/\xff/b"[..], record("", 0o100644, 2)),
            (&b"/n\xfe/\xff/c"[..], record("", 0o100644, 4)),
        ] {
            raw.extend_from_slice(name);
            raw.extend_from_slice(line.as_bytes());
            raw.push(b'\n');
        }
        let mut trace = NamedTempFile::new().unwrap();
        trace.write_all(&raw).unwrap();
        trace.flush().unwrap();

        let dir = tempdir().unwrap();
        let idx = dir.path().join("idx");
        let report = run(config(trace.path(), &idx)).unwrap();
        assert_eq!(report.dirs, 3);
        assert_eq!(report.consumers.failed_units, 0);

        let top = idx.join(OsStr::from_bytes(b"n\xfe"));
        let count = |sub: &[u8]| -> (i64, i64) {
            let conn = Connection::open(top.join(OsStr::from_bytes(sub)).join(DB_NAME)).unwrap();
            conn.query_row("SELECT COUNT(*), MAX(depth) FROM entries, summary", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap()
        };
        assert_eq!(count(b"\xfe"), (1, 1));
        assert_eq!(count(b"\xff"), (2, 1));
    }
}
