//! Buffered reader over one coordinate-sorted per-sample pileup stream.

use crate::pileup::{PileupError, Result};
use crate::record::PileupRecord;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Reader state for a single sample.
///
/// Coordinates are assumed ascending (an unenforced precondition of the
/// input format), so the newest buffered record carries the stream's
/// high-water mark. Once a refill hits end-of-stream the reader turns
/// inactive; buffered records may still remain to be drained.
pub struct SampleReader<R: BufRead> {
    reader: R,
    sample_index: usize,
    line_buf: String,
    buffer: VecDeque<PileupRecord>,
    line_number: usize,
    active: bool,
}

impl SampleReader<BufReader<File>> {
    /// Open a pileup file. Failure here is fatal at startup.
    pub fn open<P: AsRef<Path>>(path: P, sample_index: usize) -> Result<Self> {
        let file = File::open(&path).map_err(|source| PileupError::Open {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(Self::new(
            BufReader::with_capacity(256 * 1024, file),
            sample_index,
        ))
    }
}

impl<R: BufRead> SampleReader<R> {
    pub fn new(reader: R, sample_index: usize) -> Self {
        Self {
            reader,
            sample_index,
            line_buf: String::with_capacity(1024),
            buffer: VecDeque::new(),
            line_number: 0,
            active: true,
        }
    }

    pub fn sample_index(&self) -> usize {
        self.sample_index
    }

    /// Append records until the buffer holds at least `target` entries or
    /// the stream ends. Returns the new buffer size.
    ///
    /// Malformed lines are warned about and skipped without counting toward
    /// the target; only end-of-stream clears the active flag.
    pub fn refill(&mut self, target: usize) -> Result<usize> {
        while self.buffer.len() < target {
            self.line_buf.clear();
            let bytes_read = self.reader.read_line(&mut self.line_buf)?;
            if bytes_read == 0 {
                self.active = false;
                break;
            }
            self.line_number += 1;

            let line = self.line_buf.trim_end();
            if line.is_empty() {
                continue;
            }

            match PileupRecord::parse(line, self.line_number) {
                Ok(rec) => self.buffer.push_back(rec),
                Err(e) => eprintln!("Warning: sample {}: {}", self.sample_index, e),
            }
        }
        Ok(self.buffer.len())
    }

    /// Coordinate of the most recently buffered record, if any.
    pub fn peek_back_pos(&self) -> Option<u64> {
        self.buffer.back().map(|rec| rec.pos)
    }

    /// Remove and return the oldest buffered record if its coordinate is
    /// at or below `limit` (inclusive bound).
    pub fn pop_front_if(&mut self, limit: u64) -> Option<PileupRecord> {
        match self.buffer.front() {
            Some(rec) if rec.pos <= limit => self.buffer.pop_front(),
            _ => None,
        }
    }

    /// False once a refill has reached end-of-stream.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
