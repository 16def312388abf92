//! Per-directory SQLite databases
//!
//! The index is a mirror of the source tree in which every directory holds
//! a small database describing that directory alone.
//!
//! # Architecture
//!
//! ```text
//! source/                      index/source/
//! ├── a.txt                    ├── db.db   entries: a.txt, link
//! ├── link -> a.txt            │           summary: source
//! └── sub/                     └── sub/
//!     └── b.bin                    └── db.db   entries: b.bin
//!                                              summary: sub
//! ```
//!
//! Writers start from an in-memory template copy and insert one directory
//! per transaction. Readers open read-only and get a `path()` SQL function
//! naming the directory being queried. Aggregating queries collect rows in
//! per-worker scratch databases (see [`aggregate`]).

pub mod aggregate;
pub mod reader;
pub mod schema;
pub mod template;
pub mod writer;

pub use aggregate::{AggregateSql, Aggregator};
pub use reader::{open_readonly, query_rows, read_summary_totals, register_path_function, SummaryTotals};
pub use schema::{create_tables, keys, DB_NAME};
pub use template::TemplateDb;
pub use writer::write_directory;
