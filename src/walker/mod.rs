//! Parallel task engine
//!
//! Every tree operation runs on the same engine: one queue per worker,
//! tasks that enqueue their children, and an outstanding-work count that
//! ends the run when it drains.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │       QueuePool         │
//!                     │  - seeds root items     │
//!                     │  - start / wait         │
//!                     └───────────┬─────────────┘
//!                                 │ round-robin roots
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Queue 0  │             │  Queue 1  │             │ Queue N-1 │
//! │  Worker 0 │             │  Worker 1 │             │ Worker N-1│
//! │  task ──┐ │             │  task ──┐ │             │  task ──┐ │
//! │    ▲    │ │             │    ▲    │ │             │    ▲    │ │
//! │    └────┘ │             │    └────┘ │             │    └────┘ │
//! └───────────┘             └───────────┘             └───────────┘
//!          children go back onto the worker's own queue
//! ```
//!
//! Bottom-up operations layer [`CompletionToken`]s on top so a parent's
//! action runs only after all of its children have reported in.

pub mod completion;
pub mod pool;
pub mod queue;
pub mod stats;

pub use completion::{finish_node, release_parent, CompletionToken, Rollup};
pub use pool::{QueuePool, Scheduler, TaskFn};
pub use queue::{QueueStats, TaskQueue, WorkItem, MAX_PATH_LEN};
pub use stats::{WalkCounters, WalkProgress, WalkResult};
