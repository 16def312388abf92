//! Trace replay: one scout, many consumers
//!
//! ```text
//!                 ┌──────────────┐
//!   trace ──────► │    scout     │  reads lines, never parses records
//!                 └──────┬───────┘
//!          unit 0, N, 2N │ unit 1, N+1 ...     round-robin
//!            ┌───────────┼───────────┐
//!            ▼           ▼           ▼
//!       consumer 0  consumer 1 ... consumer N-1
//!        own fd      own fd         own fd      seek to unit offset,
//!                                               parse `entries` records
//! ```
//!
//! Each consumer has its own unbounded channel. The scout dropping its
//! senders is the end-of-work signal; `recv` only reports disconnection
//! once the channel is also drained.

pub mod record;
pub mod scout;

pub use record::{format_record, parse_record, DEFAULT_DELIMITER};
pub use scout::{scout, ScoutStats, TraceUnit};

use crate::entry::EntryRecord;
use crate::error::{PoolError, Result, TaskError, TaskResult, TraceError, TraceResult};
use crossbeam_channel::{unbounded, Receiver};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use tracing::{debug, warn};

/// Per-consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Units received
    pub units: u64,

    /// Entry records parsed and handed to the processor
    pub records: u64,

    /// Entry records that failed to parse
    pub bad_records: u64,

    /// Units whose directory record was bad or whose processor failed
    pub failed_units: u64,
}

impl ConsumerStats {
    fn merge(&mut self, other: &ConsumerStats) {
        self.units += other.units;
        self.records += other.records;
        self.bad_records += other.bad_records;
        self.failed_units += other.failed_units;
    }
}

/// Outcome of a distributed replay
#[derive(Debug)]
pub struct DistributeReport {
    /// Scout result; an error here means the trace was unusable
    pub scout: TraceResult<ScoutStats>,

    /// One entry per consumer, indexed by consumer id
    pub consumers: Vec<ConsumerStats>,
}

impl DistributeReport {
    /// Sum of all consumer counters
    pub fn totals(&self) -> ConsumerStats {
        let mut total = ConsumerStats::default();
        for c in &self.consumers {
            total.merge(c);
        }
        total
    }
}

/// Replay `trace` across `threads` consumers
///
/// `process` is called once per unit with the consumer id, the unit, its
/// parsed directory record and its parsed entry records. Consumer file
/// handles are opened up front; failure to open any of them is fatal.
pub fn distribute<F>(trace: &Path, delim: char, threads: usize, process: F) -> Result<DistributeReport>
where
    F: Fn(usize, &TraceUnit, EntryRecord, Vec<EntryRecord>) -> TaskResult + Sync,
{
    if threads == 0 {
        return Err(PoolError::NoThreads.into());
    }

    let mut files = Vec::with_capacity(threads);
    for _ in 0..threads {
        files.push(File::open(trace).map_err(|e| TraceError::Open {
            path: trace.to_path_buf(),
            source: e,
        })?);
    }

    let process = &process;

    thread::scope(|s| -> Result<DistributeReport> {
        let mut senders = Vec::with_capacity(threads);
        let mut consumers = Vec::with_capacity(threads);

        for (id, file) in files.into_iter().enumerate() {
            let (tx, rx) = unbounded();
            senders.push(tx);

            let handle = thread::Builder::new()
                .name(format!("consumer-{}", id))
                .spawn_scoped(s, move || consume(id, file, rx, delim, process))
                .map_err(|e| PoolError::Spawn {
                    name: format!("consumer-{}", id),
                    source: e,
                })?;
            consumers.push(handle);
        }

        let scout_handle = thread::Builder::new()
            .name("scout".to_string())
            .spawn_scoped(s, move || scout(trace, delim, senders))
            .map_err(|e| PoolError::Spawn {
                name: "scout".to_string(),
                source: e,
            })?;

        let scout = scout_handle.join().map_err(|_| PoolError::Panicked {
            name: "scout".to_string(),
        })?;

        let mut stats = Vec::with_capacity(threads);
        for (id, handle) in consumers.into_iter().enumerate() {
            stats.push(handle.join().map_err(|_| PoolError::Panicked {
                name: format!("consumer-{}", id),
            })?);
        }

        Ok(DistributeReport {
            scout,
            consumers: stats,
        })
    })
}

fn consume<F>(id: usize, mut file: File, rx: Receiver<TraceUnit>, delim: char, process: &F) -> ConsumerStats
where
    F: Fn(usize, &TraceUnit, EntryRecord, Vec<EntryRecord>) -> TaskResult,
{
    let mut stats = ConsumerStats::default();

    // Block for one unit, then take whatever else has queued up
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        batch.extend(rx.try_iter());
        debug!("Consumer {} picked up {} units", id, batch.len());

        for unit in batch {
            stats.units += 1;
            if let Err(e) = consume_unit(id, &mut file, &unit, delim, process, &mut stats) {
                warn!("Consumer {}: {}", id, e);
                stats.failed_units += 1;
            }
        }
    }

    debug!("Consumer {} done: {} units", id, stats.units);
    stats
}

fn consume_unit<F>(
    id: usize,
    file: &mut File,
    unit: &TraceUnit,
    delim: char,
    process: &F,
    stats: &mut ConsumerStats,
) -> TaskResult
where
    F: Fn(usize, &TraceUnit, EntryRecord, Vec<EntryRecord>) -> TaskResult,
{
    let dir = parse_record(&unit.line, delim).map_err(|e| TaskError::Trace {
        path: unit.name().into(),
        source: e,
    })?;

    file.seek(SeekFrom::Start(unit.offset))
        .map_err(|e| TaskError::io("seek trace", unit.name(), e))?;
    let mut reader = BufReader::new(&mut *file);

    let mut delim_buf = [0u8; 4];
    let delim_bytes = delim.encode_utf8(&mut delim_buf).as_bytes();

    let mut entries = Vec::with_capacity(unit.entries as usize);
    let mut seen = 0u64;
    let mut raw = Vec::new();
    while seen < unit.entries {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .map_err(|e| TaskError::io("read trace", unit.name(), e))?;
        if n == 0 {
            warn!(
                "Consumer {}: trace ended after {} of {} entries of '{}'",
                id,
                seen,
                unit.entries,
                unit.name().display()
            );
            break;
        }

        let line = scout::trim_newline(&raw);
        if scout::find_delim(line, delim_bytes).is_none() {
            continue;
        }
        seen += 1;

        match parse_record(line, delim) {
            Ok(record) => entries.push(record),
            Err(e) => {
                warn!("Consumer {}: bad record under '{}': {}", id, unit.name().display(), e);
                stats.bad_records += 1;
            }
        }
    }

    stats.records += entries.len() as u64;
    process(id, unit, dir, entries)
}
