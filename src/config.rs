//! Configuration types for treeindex
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Validated per-command run configurations
//! - Delimiter parsing shared by trace and query output

use crate::db::AggregateSql;
use crate::error::ConfigError;
use crate::output::DEFAULT_CAPACITY;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum worker thread count
pub const MAX_THREADS: usize = 1024;

/// Output buffer size limits
pub const MIN_BUFFER_SIZE: usize = 64;
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default delimiter for query and rollup output
pub const DEFAULT_OUTPUT_DELIMITER: char = '|';

/// Parallel filesystem indexer and query tool
#[derive(Parser, Debug, Clone)]
#[command(
    name = "treeindex",
    version,
    about = "Parallel filesystem indexer and query tool",
    long_about = "Mirrors a directory tree into a tree of per-directory SQLite databases \
                  and walks trees with a pool of worker threads, one queue per thread.",
    after_help = "EXAMPLES:\n    \
        treeindex index /data /index -p\n    \
        treeindex query /index/data -E 'SELECT path(), name, size FROM entries'\n    \
        treeindex trace2index scan.trace /index\n    \
        treeindex gendir /tmp/tree -b 4 -d 5 -f 10 -C -T -R\n    \
        treeindex rollup /index/data"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Number of worker threads
    #[arg(
        short = 'n',
        long,
        global = true,
        default_value_t = default_threads(),
        value_name = "NUM"
    )]
    pub threads: usize,

    /// Per-thread output buffer size in bytes
    #[arg(
        short = 'B',
        long,
        global = true,
        default_value_t = DEFAULT_CAPACITY,
        value_name = "BYTES"
    )]
    pub buffer_size: usize,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress header and summary
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// Subcommands, one per tree operation
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build an index tree from a source directory
    Index {
        /// Directory to index
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Where the mirrored index tree goes
        #[arg(value_name = "INDEX_ROOT")]
        index_root: PathBuf,

        /// Maximum directory depth (unlimited if not set)
        #[arg(long, value_name = "NUM")]
        max_depth: Option<usize>,

        /// Exclude paths matching pattern (can be repeated)
        #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
        exclude_patterns: Vec<String>,

        /// Show a live progress spinner
        #[arg(short = 'p', long)]
        progress: bool,
    },

    /// Run SQL against every directory database in an index
    Query {
        /// Index directories to walk
        #[arg(value_name = "INDEX_ROOT", required = true)]
        roots: Vec<PathBuf>,

        /// SQL run against each directory's summary table
        #[arg(short = 'S', long = "summary", value_name = "SQL")]
        summary_sql: Option<String>,

        /// SQL run against each directory's entries table
        #[arg(short = 'E', long = "entries", value_name = "SQL")]
        entries_sql: Option<String>,

        /// Skip directories above this level
        #[arg(long, default_value_t = 0, value_name = "NUM")]
        min_level: usize,

        /// Do not descend below this level
        #[arg(long, value_name = "NUM")]
        max_level: Option<usize>,

        /// Output column delimiter
        #[arg(short = 'd', long, default_value = "|", value_parser = parse_delimiter)]
        delimiter: char,

        /// Only run the entries query when the summary query returned rows
        #[arg(short = 'a', long = "and")]
        and: bool,

        /// Write each worker's rows to its own file, PREFIX.<worker>
        #[arg(short = 'o', long = "output", value_name = "PREFIX")]
        output_prefix: Option<PathBuf>,

        /// Aggregate mode: SQL creating the `intermediate` table in each
        /// worker's scratch database (entries rows are inserted there)
        #[arg(short = 'I', long = "create-intermediate", value_name = "SQL")]
        create_intermediate: Option<String>,

        /// Aggregate mode: SQL creating the aggregate database's tables
        #[arg(short = 'K', long = "create-aggregate", value_name = "SQL")]
        create_aggregate: Option<String>,

        /// Aggregate mode: SQL moving intermediate rows into the aggregate
        /// (attached as `aggregate`)
        #[arg(short = 'J', long = "merge", value_name = "SQL")]
        merge_sql: Option<String>,

        /// Aggregate mode: final SQL run on the aggregate, printed as output
        #[arg(short = 'G', long = "aggregate", value_name = "SQL")]
        aggregate_sql: Option<String>,
    },

    /// Build an index tree from a trace file
    Trace2index {
        /// Trace file (one record per line, directories before their entries)
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Where the index tree goes
        #[arg(value_name = "INDEX_ROOT")]
        index_root: PathBuf,

        /// Trace field delimiter
        #[arg(short = 'd', long, default_value = "\\x1e", value_parser = parse_delimiter)]
        delimiter: char,
    },

    /// Print every path under the given directories in parallel
    Find {
        /// Starting points
        #[arg(value_name = "PATH", default_value = ".")]
        paths: Vec<PathBuf>,

        /// Only print entries whose name matches this pattern
        #[arg(long, value_name = "PATTERN")]
        name: Option<String>,

        /// Maximum directory depth (unlimited if not set)
        #[arg(long, value_name = "NUM")]
        max_depth: Option<usize>,
    },

    /// Create, stat and remove a synthetic tree, timing each operation
    Gendir {
        /// Root of the synthetic tree
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// Subdirectories per directory
        #[arg(short = 'b', long, value_name = "NUM")]
        branching: usize,

        /// Levels of directories, counting the root
        #[arg(short = 'd', long, value_name = "NUM")]
        depth: usize,

        /// Files per directory
        #[arg(short = 'f', long, default_value_t = 0, value_name = "NUM")]
        files: usize,

        /// Create the tree
        #[arg(short = 'C', long)]
        create: bool,

        /// Stat every directory and file
        #[arg(short = 'T', long)]
        stat: bool,

        /// Remove files, then directories
        #[arg(short = 'R', long)]
        remove: bool,

        /// Repeat the selected phases this many times
        #[arg(short = 'i', long, default_value_t = 1, value_name = "NUM")]
        iterations: usize,

        /// Create files with mknod instead of open/close
        #[arg(short = 'k', long)]
        mknod: bool,
    },

    /// Remove a directory tree in parallel
    Rmtree {
        /// Directory to remove (including itself)
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },

    /// Print cumulative file counts and sizes for every subtree of an index
    Rollup {
        /// Index directory to aggregate
        #[arg(value_name = "INDEX_ROOT")]
        index_root: PathBuf,

        /// Output column delimiter
        #[arg(short = 'd', long, default_value = "|", value_parser = parse_delimiter)]
        delimiter: char,
    },
}

fn default_threads() -> usize {
    num_cpus::get()
}

/// Parse a delimiter given as a single character or a `\xNN` / `\t` escape
pub fn parse_delimiter(value: &str) -> Result<char, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDelimiter {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if let Some(hex) = value.strip_prefix("\\x") {
        let code = u8::from_str_radix(hex, 16).map_err(|_| invalid("expected two hex digits after \\x"))?;
        if hex.len() != 2 || !code.is_ascii() {
            return Err(invalid("expected an ASCII code \\x00 to \\x7f"));
        }
        return Ok(code as char);
    }
    if value == "\\t" {
        return Ok('\t');
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some('\n'), None) => Err(invalid("newline separates records")),
        (Some(c), None) => Ok(c),
        (None, _) => Err(invalid("empty")),
        _ => Err(invalid("must be a single character")),
    }
}

/// Number of directories in a tree of `depth` levels with `branching` children each
///
/// `None` if the count does not fit in a `u64`.
pub fn tree_dir_count(branching: usize, depth: usize) -> Option<u64> {
    let b = branching as u64;
    if b == 1 {
        return Some(depth as u64);
    }
    let exp = u32::try_from(depth).ok()?;
    Some((b.checked_pow(exp)? - 1) / (b - 1))
}

/// Validated `index` configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Canonical source directory
    pub source: PathBuf,

    /// Root of the index tree
    pub index_root: PathBuf,

    /// Number of worker threads
    pub threads: usize,

    /// Maximum traversal depth
    pub max_depth: Option<usize>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Show progress spinner
    pub show_progress: bool,
}

impl IndexConfig {
    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(path))
    }
}

/// Validated `query` configuration
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub roots: Vec<PathBuf>,
    pub threads: usize,
    pub buffer_size: usize,
    pub summary_sql: Option<String>,
    pub entries_sql: Option<String>,
    pub min_level: usize,
    pub max_level: Option<usize>,
    pub delimiter: char,
    pub and: bool,

    /// One output file per worker instead of stdout
    pub output_prefix: Option<PathBuf>,

    /// Collect entries rows and print only the aggregate query's rows
    pub aggregate: Option<AggregateSql>,
}

impl QueryConfig {
    /// Output file of worker `id` when writing per-worker files
    pub fn output_path(prefix: &Path, id: usize) -> PathBuf {
        let mut name = prefix.as_os_str().to_owned();
        name.push(format!(".{}", id));
        PathBuf::from(name)
    }
}

/// Validated `trace2index` configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub trace: PathBuf,
    pub index_root: PathBuf,
    pub threads: usize,
    pub delimiter: char,
}

/// Validated `find` configuration
#[derive(Debug, Clone)]
pub struct FindConfig {
    pub paths: Vec<PathBuf>,
    pub threads: usize,
    pub buffer_size: usize,
    pub name: Option<Regex>,
    pub max_depth: Option<usize>,
}

/// Validated `gendir` configuration
#[derive(Debug, Clone)]
pub struct GenConfig {
    pub root: PathBuf,
    pub threads: usize,
    pub branching: usize,
    pub depth: usize,
    pub files: usize,
    pub create: bool,
    pub stat: bool,
    pub remove: bool,
    pub iterations: usize,
    pub mknod: bool,

    /// Directories per iteration, root included
    pub dirs_per_iteration: u64,

    /// Print the parameter header before running (off with `--quiet`)
    pub show_header: bool,
}

impl GenConfig {
    /// Directories touched by each directory phase over all iterations
    pub fn expected_dirs(&self) -> u64 {
        self.dirs_per_iteration * self.iterations as u64
    }

    /// Files touched by each file phase over all iterations
    pub fn expected_files(&self) -> u64 {
        self.expected_dirs() * self.files as u64
    }
}

/// Validated `rmtree` configuration
#[derive(Debug, Clone)]
pub struct RemoveConfig {
    pub root: PathBuf,
    pub threads: usize,
}

/// Validated `rollup` configuration
#[derive(Debug, Clone)]
pub struct RollupConfig {
    pub index_root: PathBuf,
    pub threads: usize,
    pub buffer_size: usize,
    pub delimiter: char,
}

/// One validated command
#[derive(Debug, Clone)]
pub enum RunConfig {
    Index(IndexConfig),
    Query(QueryConfig),
    Trace(TraceConfig),
    Find(FindConfig),
    Gendir(GenConfig),
    Rmtree(RemoveConfig),
    Rollup(RollupConfig),
}

impl RunConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.threads == 0 || args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }
        if args.buffer_size < MIN_BUFFER_SIZE || args.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidBufferSize {
                size: args.buffer_size,
                min: MIN_BUFFER_SIZE,
                max: MAX_BUFFER_SIZE,
            });
        }

        let threads = args.threads;
        let buffer_size = args.buffer_size;

        let config = match args.command {
            Command::Index {
                source,
                index_root,
                max_depth,
                exclude_patterns,
                progress,
            } => {
                let source = existing_dir(&source, |path, reason| ConfigError::InvalidSource {
                    path,
                    reason,
                })?;
                check_destination(&index_root)?;
                if let Ok(dest) = resolve(&index_root) {
                    if dest.starts_with(&source) {
                        return Err(ConfigError::InvalidDestination {
                            path: index_root,
                            reason: format!("inside the source '{}'", source.display()),
                        });
                    }
                }

                RunConfig::Index(IndexConfig {
                    source,
                    index_root,
                    threads,
                    max_depth,
                    exclude_patterns: compile_all(&exclude_patterns)?,
                    show_progress: progress && !args.quiet,
                })
            }

            Command::Query {
                roots,
                summary_sql,
                entries_sql,
                min_level,
                max_level,
                delimiter,
                and,
                output_prefix,
                create_intermediate,
                create_aggregate,
                merge_sql,
                aggregate_sql,
            } => {
                if summary_sql.is_none() && entries_sql.is_none() {
                    return Err(ConfigError::MissingQuery);
                }
                let aggregate = aggregate_stages(
                    create_intermediate,
                    create_aggregate,
                    merge_sql,
                    aggregate_sql,
                )?;
                if aggregate.is_some() && entries_sql.is_none() {
                    return Err(ConfigError::IncompleteAggregate { missing: "-E" });
                }
                if let Some(max) = max_level {
                    if min_level > max {
                        return Err(ConfigError::InvalidLevels { min: min_level, max });
                    }
                }
                let roots = roots
                    .iter()
                    .map(|root| {
                        existing_dir(root, |path, reason| ConfigError::InvalidSource { path, reason })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                RunConfig::Query(QueryConfig {
                    roots,
                    threads,
                    buffer_size,
                    summary_sql,
                    entries_sql,
                    min_level,
                    max_level,
                    delimiter,
                    and,
                    output_prefix,
                    aggregate,
                })
            }

            Command::Trace2index {
                trace,
                index_root,
                delimiter,
            } => {
                match fs::metadata(&trace) {
                    Ok(md) if md.is_file() => {}
                    Ok(_) => {
                        return Err(ConfigError::InvalidSource {
                            path: trace,
                            reason: "not a regular file".to_string(),
                        })
                    }
                    Err(e) => {
                        return Err(ConfigError::InvalidSource {
                            path: trace,
                            reason: e.to_string(),
                        })
                    }
                }
                check_destination(&index_root)?;

                RunConfig::Trace(TraceConfig {
                    trace,
                    index_root,
                    threads,
                    delimiter,
                })
            }

            Command::Find {
                paths,
                name,
                max_depth,
            } => RunConfig::Find(FindConfig {
                paths,
                threads,
                buffer_size,
                name: name.as_deref().map(compile).transpose()?,
                max_depth,
            }),

            Command::Gendir {
                root,
                branching,
                depth,
                files,
                create,
                stat,
                remove,
                iterations,
                mknod,
            } => {
                if branching == 0 || depth == 0 {
                    return Err(ConfigError::InvalidTreeShape {
                        reason: "branching factor and depth must both be at least 1".to_string(),
                    });
                }
                let dirs_per_iteration =
                    tree_dir_count(branching, depth).ok_or_else(|| ConfigError::InvalidTreeShape {
                        reason: format!("{} levels of {} subdirectories is too many", depth, branching),
                    })?;
                if dirs_per_iteration
                    .checked_mul(iterations as u64)
                    .and_then(|d| d.checked_mul(files.max(1) as u64))
                    .is_none()
                {
                    return Err(ConfigError::InvalidTreeShape {
                        reason: "expected entry count overflows".to_string(),
                    });
                }

                // No phase selected means run all of them
                let all = !(create || stat || remove);

                RunConfig::Gendir(GenConfig {
                    root,
                    threads,
                    branching,
                    depth,
                    files,
                    create: create || all,
                    stat: stat || all,
                    remove: remove || all,
                    iterations,
                    mknod,
                    dirs_per_iteration,
                    show_header: !args.quiet,
                })
            }

            Command::Rmtree { root } => {
                match fs::symlink_metadata(&root) {
                    Ok(md) if md.is_dir() => {}
                    Ok(_) => {
                        return Err(ConfigError::InvalidSource {
                            path: root,
                            reason: "not a directory".to_string(),
                        })
                    }
                    Err(e) => {
                        return Err(ConfigError::InvalidSource {
                            path: root,
                            reason: e.to_string(),
                        })
                    }
                }
                if resolve(&root).map_or(false, |p| p.parent().is_none()) {
                    return Err(ConfigError::InvalidSource {
                        path: root,
                        reason: "refusing to remove the filesystem root".to_string(),
                    });
                }

                RunConfig::Rmtree(RemoveConfig { root, threads })
            }

            Command::Rollup {
                index_root,
                delimiter,
            } => RunConfig::Rollup(RollupConfig {
                index_root: existing_dir(&index_root, |path, reason| ConfigError::InvalidSource {
                    path,
                    reason,
                })?,
                threads,
                buffer_size,
                delimiter,
            }),
        };

        Ok(config)
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns.iter().map(|p| compile(p)).collect()
}

/// Canonicalize `path`, requiring an accessible directory
fn existing_dir<F>(path: &Path, err: F) -> Result<PathBuf, ConfigError>
where
    F: Fn(PathBuf, String) -> ConfigError,
{
    let canonical = path
        .canonicalize()
        .map_err(|e| err(path.to_path_buf(), e.to_string()))?;
    if !canonical.is_dir() {
        return Err(err(path.to_path_buf(), "not a directory".to_string()));
    }
    fs::read_dir(&canonical).map_err(|e| err(path.to_path_buf(), e.to_string()))?;
    Ok(canonical)
}

/// A destination must be a directory if it already exists
fn check_destination(path: &Path) -> Result<(), ConfigError> {
    match fs::metadata(path) {
        Ok(md) if !md.is_dir() => Err(ConfigError::InvalidDestination {
            path: path.to_path_buf(),
            reason: "exists and is not a directory".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Best-effort absolute form of a path that may not exist yet
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = std::path::absolute(path)?;
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(resolve(parent)?.join(name)),
        _ => Ok(absolute),
    }
}

/// All four aggregation stages, or none of them
fn aggregate_stages(
    create_intermediate: Option<String>,
    create_aggregate: Option<String>,
    merge: Option<String>,
    final_query: Option<String>,
) -> Result<Option<AggregateSql>, ConfigError> {
    match (create_intermediate, create_aggregate, merge, final_query) {
        (None, None, None, None) => Ok(None),
        (Some(create_intermediate), Some(create_aggregate), Some(merge), Some(final_query)) => {
            Ok(Some(AggregateSql {
                create_intermediate,
                create_aggregate,
                merge,
                final_query,
            }))
        }
        (i, k, j, _) => {
            let missing = if i.is_none() {
                "-I"
            } else if k.is_none() {
                "-K"
            } else if j.is_none() {
                "-J"
            } else {
                "-G"
            };
            Err(ConfigError::IncompleteAggregate { missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Result<RunConfig, ConfigError> {
        let mut argv = vec!["treeindex"];
        argv.extend_from_slice(args);
        RunConfig::from_args(CliArgs::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("|").unwrap(), '|');
        assert_eq!(parse_delimiter("\\x1e").unwrap(), '\x1e');
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("\\xzz").is_err());
        assert!(parse_delimiter("\\xff").is_err());
        assert!(parse_delimiter("\n").is_err());
    }

    #[test]
    fn test_tree_dir_count() {
        assert_eq!(tree_dir_count(2, 3), Some(7));
        assert_eq!(tree_dir_count(10, 1), Some(1));
        assert_eq!(tree_dir_count(1, 5), Some(5));
        assert_eq!(tree_dir_count(3, 4), Some(40));
        assert_eq!(tree_dir_count(1 << 20, 10), None);
    }

    #[test]
    fn test_thread_count_limits() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        assert!(matches!(
            parse(&["-n", "0", "rmtree", root]),
            Err(ConfigError::InvalidThreadCount { .. })
        ));
        assert!(matches!(
            parse(&["-n", "2000", "rmtree", root]),
            Err(ConfigError::InvalidThreadCount { .. })
        ));
        assert!(matches!(
            parse(&["rmtree", root, "-n", "3"]),
            Ok(RunConfig::Rmtree(RemoveConfig { threads: 3, .. }))
        ));
    }

    #[test]
    fn test_query_needs_sql_and_sane_levels() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        assert!(matches!(parse(&["query", root]), Err(ConfigError::MissingQuery)));
        assert!(matches!(
            parse(&["query", root, "-E", "SELECT 1", "--min-level", "3", "--max-level", "1"]),
            Err(ConfigError::InvalidLevels { min: 3, max: 1 })
        ));

        match parse(&["query", root, "-S", "SELECT 1", "--and", "-d", "\\x1e"]).unwrap() {
            RunConfig::Query(q) => {
                assert!(q.and);
                assert_eq!(q.delimiter, '\x1e');
                assert_eq!(q.buffer_size, DEFAULT_CAPACITY);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_query_aggregate_and_output_flags() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        assert!(matches!(
            parse(&["query", root, "-E", "SELECT 1", "-I", "CREATE TABLE intermediate (x)"]),
            Err(ConfigError::IncompleteAggregate { missing: "-K" })
        ));
        let stages = [
            "-I",
            "CREATE TABLE intermediate (x)",
            "-K",
            "CREATE TABLE t (x)",
            "-J",
            "INSERT INTO aggregate.t SELECT * FROM intermediate",
            "-G",
            "SELECT COUNT(*) FROM t",
        ];
        let mut no_entries = vec!["query", root, "-S", "SELECT 1"];
        no_entries.extend_from_slice(&stages);
        assert!(matches!(
            parse(&no_entries),
            Err(ConfigError::IncompleteAggregate { missing: "-E" })
        ));

        let mut full = vec!["query", root, "-E", "SELECT size FROM entries", "-o", "/tmp/out"];
        full.extend_from_slice(&stages);
        match parse(&full).unwrap() {
            RunConfig::Query(q) => {
                let agg = q.aggregate.unwrap();
                assert_eq!(agg.final_query, "SELECT COUNT(*) FROM t");
                assert_eq!(
                    QueryConfig::output_path(q.output_prefix.as_deref().unwrap(), 3),
                    PathBuf::from("/tmp/out.3")
                );
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_index_destination_inside_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();

        let inside = src.join("idx");
        assert!(matches!(
            parse(&["index", src.to_str().unwrap(), inside.to_str().unwrap()]),
            Err(ConfigError::InvalidDestination { .. })
        ));

        let outside = dir.path().join("idx");
        match parse(&[
            "index",
            src.to_str().unwrap(),
            outside.to_str().unwrap(),
            "--exclude",
            r"\.snapshot",
        ])
        .unwrap()
        {
            RunConfig::Index(c) => {
                assert!(c.is_excluded("/data/.snapshot/hourly.0"));
                assert!(!c.is_excluded("/data/myfile.txt"));
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_gendir_shape() {
        assert!(matches!(
            parse(&["gendir", "/tmp/x", "-b", "0", "-d", "3"]),
            Err(ConfigError::InvalidTreeShape { .. })
        ));

        match parse(&["gendir", "/tmp/x", "-b", "2", "-d", "3", "-f", "1", "-C"]).unwrap() {
            RunConfig::Gendir(g) => {
                assert!(g.create && !g.stat && !g.remove);
                assert_eq!(g.expected_dirs(), 7);
                assert_eq!(g.expected_files(), 7);
            }
            other => panic!("unexpected config {:?}", other),
        }

        match parse(&["gendir", "/tmp/x", "-b", "2", "-d", "3", "-i", "2"]).unwrap() {
            RunConfig::Gendir(g) => {
                assert!(g.create && g.stat && g.remove);
                assert_eq!(g.expected_dirs(), 14);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_bad_exclude_pattern() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        let idx = dir.path().join("idx");

        assert!(matches!(
            parse(&["index", src.to_str().unwrap(), idx.to_str().unwrap(), "--exclude", "("]),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
