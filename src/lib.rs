//! treeindex - parallel filesystem indexer and query tool
//!
//! Mirrors a directory tree into a tree of per-directory SQLite databases
//! and runs every tree operation (indexing, querying, finding, synthetic
//! tree generation, removal, rollups) on one task engine.
//!
//! # Architecture
//!
//! ```text
//!   source tree                              trace file
//!        │                                       │
//!        │ index_dir                             │ scout ──► consumers
//!        ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     QueuePool (walker)                          │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │Worker 0 │  │Worker 1 │  │Worker 2 │  ...    │Worker N │      │
//! │  │ queue 0 │  │ queue 1 │  │ queue 2 │         │ queue N │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       │  children go back onto the worker's own queue           │
//! │       │  completion tokens gate bottom-up actions               │
//! └───────┼────────────┼────────────┼────────────────────┼──────────┘
//!         ▼            ▼            ▼                    ▼
//!   ┌──────────────────────────┐        ┌──────────────────────────┐
//!   │ index tree: one db.db    │        │ OutputBuffers            │
//!   │ per directory (entries + │        │ one buffer per worker,   │
//!   │ summary)                 │        │ one locked sink          │
//!   └──────────────────────────┘        └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Build an index
//! treeindex index /data /index -p
//!
//! # Query it in parallel
//! treeindex query /index/data -E "SELECT path(), name, size FROM entries WHERE size > 1000000"
//!
//! # Cumulative totals per subtree
//! treeindex rollup /index/data
//! ```

pub mod config;
pub mod db;
pub mod entry;
pub mod error;
pub mod output;
pub mod progress;
pub mod tasks;
pub mod trace;
pub mod walker;

pub use config::{CliArgs, RunConfig};
pub use error::{IndexError, Result, TaskError};
pub use output::OutputBuffers;
pub use walker::{CompletionToken, QueuePool, Scheduler, WalkResult, WorkItem};
