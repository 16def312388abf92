//! Error types for treeindex
//!
//! The hierarchy mirrors the layers of the tool:
//! - Pool errors (thread pool startup)
//! - Database errors (per-directory SQLite files)
//! - Trace errors (scout and record parsing)
//! - Configuration and CLI errors
//! - Task errors (one directory failed, the walk goes on)
//!
//! Library code returns these typed errors; the binary wraps them with
//! anyhow context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for treeindex runs
#[derive(Error, Debug)]
pub enum IndexError {
    /// Thread pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Trace errors
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors outside of a single directory task
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Thread pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// A pool needs at least one worker
    #[error("Thread pool needs at least one thread")]
    NoThreads,

    /// Fewer workers came up than were requested
    #[error("Started {started} of {requested} worker threads")]
    PartialStart { started: usize, requested: usize },

    /// A helper thread (scout, consumer, progress) could not be spawned
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn { name: String, source: io::Error },

    /// A helper thread panicked
    #[error("Thread '{name}' panicked")]
    Panicked { name: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create a database file
    #[error("Failed to create database at '{path}': {source}")]
    CreateFailed { path: PathBuf, source: io::Error },

    /// Template database could not be built
    #[error("Template database error: {0}")]
    Template(String),

    /// Database file does not exist
    #[error("No database at '{path}'")]
    Missing { path: PathBuf },

    /// A query row could not be written out
    #[error("Failed to write row: {0}")]
    Emit(#[source] io::Error),
}

/// Trace errors
#[derive(Error, Debug)]
pub enum TraceError {
    /// Trace file could not be opened
    #[error("Could not open trace '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },

    /// Reading the trace failed mid-stream
    #[error("Could not read trace '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    /// Trace has no first line
    #[error("Could not get the first line of trace '{path}'")]
    Empty { path: PathBuf },

    /// First line of the trace has no delimiter
    #[error("First line of trace '{path}' does not contain the delimiter")]
    NoDelimiter { path: PathBuf },

    /// First line of the trace is not a directory
    #[error("First line of trace '{path}' is not a directory")]
    FirstNotDirectory { path: PathBuf },

    /// A record has fewer fields than expected
    #[error("Record is missing the '{field}' field")]
    MissingField { field: &'static str },

    /// A numeric field did not parse
    #[error("Bad value '{value}' in '{field}' field")]
    BadField { field: &'static str, value: String },

    /// The type field is not a known tag
    #[error("Unknown entry type '{tag}'")]
    UnknownType { tag: String },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid thread count
    #[error("Invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Invalid output buffer size
    #[error("Invalid output buffer size {size}: must be between {min} and {max}")]
    InvalidBufferSize { size: usize, min: usize, max: usize },

    /// Invalid regex pattern
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Invalid delimiter
    #[error("Invalid delimiter '{value}': {reason}")]
    InvalidDelimiter { value: String, reason: String },

    /// Source tree problem
    #[error("Invalid source '{path}': {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    /// Destination problem
    #[error("Invalid destination '{path}': {reason}")]
    InvalidDestination { path: PathBuf, reason: String },

    /// Level bounds out of order
    #[error("Invalid levels: min level {min} is greater than max level {max}")]
    InvalidLevels { min: usize, max: usize },

    /// A query needs at least one SQL statement
    #[error("Nothing to run: pass a summary (-S) or entries (-E) query")]
    MissingQuery,

    /// Synthetic tree parameters out of range
    #[error("Invalid tree shape: {reason}")]
    InvalidTreeShape { reason: String },

    /// Aggregate mode needs -I, -K, -J, -G and an entries query
    #[error("Aggregate mode is missing {missing}")]
    IncompleteAggregate { missing: &'static str },
}

/// Failure while processing a single node
///
/// Returned by task functions. The pool logs it and keeps going; the
/// subtree under the failing node is abandoned.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Filesystem operation failed
    #[error("Failed to {op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    /// Database operation failed
    #[error("Database error at '{path}': {source}")]
    Database { path: PathBuf, source: DbError },

    /// Writing to the output stream failed
    #[error("Failed to write output: {0}")]
    Output(#[source] io::Error),

    /// A child path would exceed the path length bound
    #[error("Path too long under '{parent}': {name}")]
    PathTooLong { parent: PathBuf, name: String },

    /// Trace record could not be used
    #[error("Bad trace record under '{path}': {source}")]
    Trace { path: PathBuf, source: TraceError },

    /// Path lies outside the tree being processed
    #[error("'{path}' is outside of '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl TaskError {
    /// Build an I/O task error
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TaskError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Build a database task error
    pub fn db(path: impl Into<PathBuf>, source: impl Into<DbError>) -> Self {
        TaskError::Database {
            path: path.into(),
            source: source.into(),
        }
    }

    /// True if the node vanished underneath us (a race with another process)
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Result type alias for IndexError
pub type Result<T> = std::result::Result<T, IndexError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for TraceError
pub type TraceResult<T> = std::result::Result<T, TraceError>;

/// Result type alias for PoolError
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Status returned by a task function
pub type TaskResult = std::result::Result<(), TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_kinds() {
        let err = TaskError::io(
            "open directory",
            "/data/a",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/data/a"));
        assert!(!err.is_not_found());

        let gone = TaskError::io("stat", "/data/b", io::Error::from(io::ErrorKind::NotFound));
        assert!(gone.is_not_found());

        let output = TaskError::Output(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!output.is_not_found());
    }

    #[test]
    fn test_error_conversion() {
        let trace_err = TraceError::Empty {
            path: "/tmp/trace".into(),
        };
        let err: IndexError = trace_err.into();
        assert!(matches!(err, IndexError::Trace(_)));

        let pool_err = PoolError::PartialStart {
            started: 3,
            requested: 4,
        };
        let err: IndexError = pool_err.into();
        assert_eq!(
            err.to_string(),
            "Pool error: Started 3 of 4 worker threads"
        );
    }
}
