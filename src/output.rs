//! Per-worker output buffering
//!
//! Each worker owns one [`OutputBuffer`]. Lines accumulate locally and are
//! written to the sink only when the buffer fills. With a shared sink its
//! lock is the single point where workers contend; with per-worker sinks
//! there is no contention at all.

use parking_lot::Mutex;
use std::io::{self, Write};

/// Default buffer capacity in bytes
pub const DEFAULT_CAPACITY: usize = 4096;

/// Fixed-capacity byte buffer with a line counter
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    capacity: usize,
    count: u64,
}

impl OutputBuffer {
    /// Create an empty buffer
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    /// Bytes currently buffered
    pub fn filled(&self) -> usize {
        self.buf.len()
    }

    /// Buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of writes accepted so far (buffered or written through)
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Buffer `bytes`, flushing first if they do not fit
    ///
    /// A payload larger than the whole buffer is written straight to the
    /// sink after the existing contents, so ordering is preserved.
    pub fn write<W: Write>(&mut self, bytes: &[u8], sink: &Mutex<W>) -> io::Result<()> {
        self.write_parts(&[bytes], sink)
    }

    /// Buffer `line` followed by a newline
    pub fn println<W: Write>(&mut self, line: &[u8], sink: &Mutex<W>) -> io::Result<()> {
        self.write_parts(&[line, b"\n"], sink)
    }

    fn write_parts<W: Write>(&mut self, parts: &[&[u8]], sink: &Mutex<W>) -> io::Result<()> {
        let size: usize = parts.iter().map(|p| p.len()).sum();

        if self.capacity - self.buf.len() < size {
            self.flush(sink)?;
        }

        if size > self.capacity {
            let mut out = sink.lock();
            for part in parts {
                out.write_all(part)?;
            }
        } else {
            for part in parts {
                self.buf.extend_from_slice(part);
            }
        }

        self.count += 1;
        Ok(())
    }

    /// Write the buffered bytes to the sink under its lock and reset
    ///
    /// Returns the number of bytes written.
    pub fn flush<W: Write>(&mut self, sink: &Mutex<W>) -> io::Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }

        let written = self.buf.len();
        sink.lock().write_all(&self.buf)?;
        self.buf.clear();
        Ok(written)
    }
}

/// One buffer per worker plus the sink(s) they drain into
///
/// Either every buffer drains into one shared, locked sink, or each buffer
/// has a destination of its own (`-o`), whose lock only its worker takes.
pub struct OutputBuffers<W: Write> {
    buffers: Vec<Mutex<OutputBuffer>>,
    sinks: Vec<Mutex<W>>,
}

impl<W: Write> OutputBuffers<W> {
    /// Create `count` buffers of `capacity` bytes each over one shared sink
    pub fn new(count: usize, capacity: usize, sink: W) -> Self {
        Self {
            buffers: (0..count)
                .map(|_| Mutex::new(OutputBuffer::with_capacity(capacity)))
                .collect(),
            sinks: vec![Mutex::new(sink)],
        }
    }

    /// Create one buffer per sink, each draining into its own sink
    pub fn per_worker(capacity: usize, sinks: Vec<W>) -> Self {
        Self {
            buffers: sinks
                .iter()
                .map(|_| Mutex::new(OutputBuffer::with_capacity(capacity)))
                .collect(),
            sinks: sinks.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Check if there are no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn sink(&self, id: usize) -> &Mutex<W> {
        &self.sinks[id % self.sinks.len()]
    }

    /// Append a newline-terminated line to worker `id`'s buffer
    pub fn println(&self, id: usize, line: impl AsRef<[u8]>) -> io::Result<()> {
        self.buffers[id].lock().println(line.as_ref(), self.sink(id))
    }

    /// Append raw bytes to worker `id`'s buffer
    pub fn write(&self, id: usize, bytes: impl AsRef<[u8]>) -> io::Result<()> {
        self.buffers[id].lock().write(bytes.as_ref(), self.sink(id))
    }

    /// Flush worker `id`'s buffer
    pub fn flush(&self, id: usize) -> io::Result<usize> {
        self.buffers[id].lock().flush(self.sink(id))
    }

    /// Flush every buffer in index order, then the sinks themselves
    pub fn flush_all(&self) -> io::Result<usize> {
        let mut total = 0;
        for (id, buffer) in self.buffers.iter().enumerate() {
            total += buffer.lock().flush(self.sink(id))?;
        }
        for sink in &self.sinks {
            sink.lock().flush()?;
        }
        Ok(total)
    }

    /// Lines written across all buffers
    pub fn lines(&self) -> u64 {
        self.buffers.iter().map(|b| b.lock().count()).sum()
    }

    /// Flush everything and hand back the sinks, one per destination
    pub fn into_sinks(self) -> io::Result<Vec<W>> {
        self.flush_all()?;
        Ok(self.sinks.into_iter().map(Mutex::into_inner).collect())
    }

    /// Flush everything and hand back the first (usually only) sink
    pub fn into_inner(self) -> io::Result<W> {
        self.into_sinks()?
            .into_iter()
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no output sink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_holds_until_full() {
        let sink = Mutex::new(Vec::new());
        let mut buf = OutputBuffer::with_capacity(8);

        buf.write(b"abc", &sink).unwrap();
        buf.write(b"def", &sink).unwrap();
        assert!(sink.lock().is_empty());
        assert_eq!(buf.filled(), 6);

        // does not fit: previous contents go out first
        buf.write(b"ghi", &sink).unwrap();
        assert_eq!(sink.lock().as_slice(), b"abcdef");
        assert_eq!(buf.filled(), 3);
        assert_eq!(buf.count(), 3);
    }

    #[test]
    fn test_oversized_write_preserves_order() {
        let sink = Mutex::new(Vec::new());
        let mut buf = OutputBuffer::with_capacity(4);

        buf.write(b"ab", &sink).unwrap();
        buf.write(b"0123456789", &sink).unwrap();
        buf.write(b"cd", &sink).unwrap();
        buf.flush(&sink).unwrap();

        assert_eq!(sink.lock().as_slice(), b"ab0123456789cd");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_println_at_capacity_boundary() {
        let sink = Mutex::new(Vec::new());
        let mut buf = OutputBuffer::with_capacity(4);

        // "abc\n" fits exactly
        buf.println(b"abc", &sink).unwrap();
        assert_eq!(buf.filled(), 4);
        assert!(sink.lock().is_empty());

        // "abcd\n" is one byte too large for the buffer
        buf.println(b"abcd", &sink).unwrap();
        assert_eq!(sink.lock().as_slice(), b"abc\nabcd\n");
        assert!(buf.is_empty());
        assert_eq!(buf.count(), 2);
    }

    #[test]
    fn test_concatenation_matches_writes() {
        let sink = Mutex::new(Vec::new());
        let mut buf = OutputBuffer::with_capacity(16);
        let mut expected = Vec::new();

        for i in 0..200usize {
            let payload = vec![b'a' + (i % 26) as u8; i % 37];
            buf.write(&payload, &sink).unwrap();
            expected.extend_from_slice(&payload);
        }
        buf.flush(&sink).unwrap();

        assert_eq!(*sink.lock(), expected);
    }

    #[test]
    fn test_buffers_flush_all() {
        let buffers = OutputBuffers::new(3, 64, Vec::new());
        buffers.println(0, "zero").unwrap();
        buffers.println(2, "two").unwrap();
        buffers.println(1, "one").unwrap();

        assert_eq!(buffers.lines(), 3);
        let out = buffers.into_inner().unwrap();
        assert_eq!(out, b"zero\none\ntwo\n");
    }

    #[test]
    fn test_buffers_from_threads() {
        let buffers = std::sync::Arc::new(OutputBuffers::new(4, 32, Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|id| {
                let buffers = std::sync::Arc::clone(&buffers);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffers.println(id, format!("{}-{}", id, i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let buffers = std::sync::Arc::try_unwrap(buffers).ok().unwrap();
        let out = String::from_utf8(buffers.into_inner().unwrap()).unwrap();
        let mut lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 400);
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 400);
    }

    #[test]
    fn test_per_worker_sinks_stay_separate() {
        let buffers = OutputBuffers::per_worker(8, vec![Vec::new(), Vec::new()]);
        buffers.println(1, "b1").unwrap();
        buffers.println(0, "a1").unwrap();
        buffers.println(1, "b2-long-enough-to-spill").unwrap();

        assert_eq!(buffers.len(), 2);
        let sinks = buffers.into_sinks().unwrap();
        assert_eq!(sinks[0], b"a1\n");
        assert_eq!(sinks[1], b"b1\nb2-long-enough-to-spill\n");
    }
}
