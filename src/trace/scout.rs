//! Scout: split a trace into per-directory work units
//!
//! The scout reads the trace once, front to back, without parsing records.
//! Every directory line opens a new [`TraceUnit`]; the lines after it up to
//! the next directory line are that directory's entries. A finished unit
//! goes to the next consumer in round-robin order.

use crate::error::{TraceError, TraceResult};
use crossbeam_channel::Sender;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// One directory's span of the trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceUnit {
    /// The directory's own record, without the newline, as raw bytes
    pub line: Vec<u8>,

    /// Byte offset of the first delimiter in `line`
    pub first_delim: usize,

    /// Byte offset in the trace of the first line after the directory line
    pub offset: u64,

    /// Number of entry records that follow
    pub entries: u64,
}

impl TraceUnit {
    /// Name field of the directory record
    ///
    /// Taken from the raw bytes, so distinct non-UTF-8 names stay distinct.
    pub fn name(&self) -> &Path {
        let end = self.first_delim.min(self.line.len());
        Path::new(OsStr::from_bytes(&self.line[..end]))
    }
}

/// What the scout saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoutStats {
    /// Directory records (one unit each)
    pub dirs: u64,

    /// Non-directory records
    pub files: u64,

    /// Directories with no entry records
    pub empty_dirs: u64,

    /// Lines skipped because they hold no delimiter
    pub bad_lines: u64,
}

/// Position of the first occurrence of `delim` in `line`
pub(crate) fn find_delim(line: &[u8], delim: &[u8]) -> Option<usize> {
    if delim.len() == 1 {
        return line.iter().position(|&b| b == delim[0]);
    }
    line.windows(delim.len()).position(|w| w == delim)
}

/// Strip a trailing `\n` (and `\r`) from a raw line
pub(crate) fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_directory(line: &[u8], first_delim: usize, delim_len: usize) -> bool {
    line.get(first_delim + delim_len) == Some(&b'd')
}

/// Scan `path` and hand units to `senders` round-robin
///
/// The senders are consumed: when this returns (successfully or not) every
/// channel disconnects, which is how consumers learn there is no more work.
pub fn scout(path: &Path, delim: char, senders: Vec<Sender<TraceUnit>>) -> TraceResult<ScoutStats> {
    let file = File::open(path).map_err(|e| TraceError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let mut delim_buf = [0u8; 4];
    let delim = delim.encode_utf8(&mut delim_buf).as_bytes();

    let read_err = |e| TraceError::Read {
        path: path.to_path_buf(),
        source: e,
    };

    let mut raw = Vec::new();
    let mut offset = reader.read_until(b'\n', &mut raw).map_err(read_err)? as u64;
    if offset == 0 {
        return Err(TraceError::Empty {
            path: path.to_path_buf(),
        });
    }

    let first = trim_newline(&raw);
    let Some(first_delim) = find_delim(first, delim) else {
        return Err(TraceError::NoDelimiter {
            path: path.to_path_buf(),
        });
    };
    if !is_directory(first, first_delim, delim.len()) {
        return Err(TraceError::FirstNotDirectory {
            path: path.to_path_buf(),
        });
    }

    let mut stats = ScoutStats {
        dirs: 1,
        ..Default::default()
    };
    let mut next = 0usize;
    let mut unit = TraceUnit {
        line: first.to_vec(),
        first_delim,
        offset,
        entries: 0,
    };

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).map_err(read_err)?;
        if n == 0 {
            break;
        }
        offset += n as u64;

        let line = trim_newline(&raw);
        let Some(pos) = find_delim(line, delim) else {
            warn!("Scout: skipping line without a delimiter at byte {}", offset - n as u64);
            stats.bad_lines += 1;
            continue;
        };

        if is_directory(line, pos, delim.len()) {
            let finished = std::mem::replace(
                &mut unit,
                TraceUnit {
                    line: line.to_vec(),
                    first_delim: pos,
                    offset,
                    entries: 0,
                },
            );
            send(&senders, &mut next, finished, &mut stats);
            stats.dirs += 1;
        } else {
            unit.entries += 1;
            stats.files += 1;
        }
    }

    send(&senders, &mut next, unit, &mut stats);

    debug!(
        "Scout finished: {} dirs, {} files, {} empty dirs",
        stats.dirs, stats.files, stats.empty_dirs
    );
    Ok(stats)
}

fn send(senders: &[Sender<TraceUnit>], next: &mut usize, unit: TraceUnit, stats: &mut ScoutStats) {
    if unit.entries == 0 {
        stats.empty_dirs += 1;
    }

    let target = *next % senders.len().max(1);
    *next = next.wrapping_add(1);

    match senders.get(target) {
        Some(tx) => {
            if tx.send(unit).is_err() {
                warn!("Scout: consumer {} is gone, dropping a unit", target);
            }
        }
        None => warn!("Scout: no consumers, dropping a unit"),
    }
}
