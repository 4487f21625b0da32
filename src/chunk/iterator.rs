//! Iterator contract for chunks, plus the shared index-accessing iterator
//!
//! Every concrete encoding exposes its samples through [`ChunkIterator`].
//! Encodings that can decode a sample by index only need to supply an
//! [`IndexAccessor`]; [`IndexIterator`] then provides scanning, binary-search
//! seeking, and batching for free, so per-encoding surface is reduced to pure
//! decode-by-index logic.

use crate::error::ChunkError;
use crate::types::{Interval, Sample, Timestamp, ZERO_SAMPLE};

/// Samples per batch. Chosen by benchmarking batch sizes from 1 to 128 on
/// the read path.
pub const BATCH_SIZE: usize = 12;

/// A small, sorted bundle of (timestamp, value) pairs, passed by value to
/// amortize per-sample call overhead for bulk consumers.
#[derive(Debug, Clone, Copy)]
pub struct Batch {
    pub timestamps: [i64; BATCH_SIZE],
    pub values: [f64; BATCH_SIZE],
    /// Read cursor for consumers stepping through the batch
    pub index: usize,
    /// Number of valid entries
    pub length: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            timestamps: [0; BATCH_SIZE],
            values: [0.0; BATCH_SIZE],
            index: 0,
            length: 0,
        }
    }
}

/// Enables efficient access to the content of a chunk.
///
/// An iterator is a single-owner cursor: it is not safe for concurrent use,
/// and it is invalid once the underlying chunk is mutated (the borrow taken
/// by [`super::Chunk::new_iterator`] enforces the latter).
pub trait ChunkIterator {
    /// Scans the next sample in the chunk. Directly after the iterator has
    /// been created, the next sample is the first in the chunk; otherwise it
    /// is the one following the last sample scanned or found. Returns false
    /// if the end of the chunk is reached or an error has occurred
    /// (disambiguate via [`err`](ChunkIterator::err)).
    fn scan(&mut self) -> bool;

    /// Repositions to the oldest sample with a timestamp at or after `t`,
    /// by binary search where the encoding allows it. Returns false if no
    /// such sample exists or an error has occurred. On success, `value()`
    /// reflects the found sample and the next `scan` continues from there.
    fn find_at_or_after(&mut self, t: Timestamp) -> bool;

    /// The last sample scanned or found. Returns [`ZERO_SAMPLE`] before
    /// either method was ever called.
    fn value(&self) -> Sample;

    /// Returns a batch of up to `size` samples starting at the current
    /// position. NB: not idempotent! Should only be called once per scan;
    /// the next `scan` continues immediately after the last sample the
    /// batch delivered.
    fn batch(&mut self, size: usize) -> Batch;

    /// The last error encountered. Sticky: once set it remains set. An
    /// error signals data corruption in the chunk and requires the storage
    /// manager to quarantine the chunk rather than retry.
    fn err(&self) -> Option<ChunkError>;
}

/// Narrow random-access capability a concrete encoding supplies to obtain
/// the generic iterator.
///
/// Out-of-range access must set a sticky [`ChunkError::BoundsExceeded`] and
/// return zero values rather than panic; decode failures surface the same
/// way as sticky [`ChunkError::CorruptData`].
pub trait IndexAccessor {
    fn timestamp_at(&self, index: usize) -> Timestamp;
    fn value_at(&self, index: usize) -> f64;
    /// Sticky error flag for the accesses made so far.
    fn err(&self) -> Option<ChunkError>;
}

/// Chunk iterator for any encoding with an [`IndexAccessor`] implementation.
///
/// The cursor tracks the index of the last sample delivered (`None` while
/// fresh), so `batch` needs no compensating rewind to keep the "next scan
/// continues after the batch" convention.
pub struct IndexIterator<A> {
    len: usize,
    pos: Option<usize>,
    last: Sample,
    acc: A,
}

impl<A: IndexAccessor> IndexIterator<A> {
    pub fn new(len: usize, acc: A) -> Self {
        Self {
            len,
            pos: None,
            last: ZERO_SAMPLE,
            acc,
        }
    }
}

impl<A: IndexAccessor> ChunkIterator for IndexIterator<A> {
    fn scan(&mut self) -> bool {
        let next = self.pos.map_or(0, |p| p + 1);
        if next >= self.len {
            return false;
        }
        self.pos = Some(next);
        self.last = Sample {
            timestamp: self.acc.timestamp_at(next),
            value: self.acc.value_at(next),
        };
        self.acc.err().is_none()
    }

    fn find_at_or_after(&mut self, t: Timestamp) -> bool {
        // Valid because timestamps are strictly increasing by index.
        let mut lo = 0;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.acc.timestamp_at(mid) < t {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.len || self.acc.err().is_some() {
            return false;
        }
        self.pos = Some(lo);
        self.last = Sample {
            timestamp: self.acc.timestamp_at(lo),
            value: self.acc.value_at(lo),
        };
        true
    }

    fn value(&self) -> Sample {
        self.last
    }

    fn batch(&mut self, size: usize) -> Batch {
        let mut batch = Batch::default();
        let size = size.min(BATCH_SIZE);
        // Inclusive of the position reached by the last scan/find; a fresh
        // iterator batches from the first sample.
        let start = self.pos.unwrap_or(0);
        let mut n = 0;
        while n < size && start + n < self.len {
            batch.timestamps[n] = self.acc.timestamp_at(start + n);
            batch.values[n] = self.acc.value_at(start + n);
            n += 1;
        }
        if n > 0 {
            // Leave the cursor on the last delivered sample so the next
            // scan yields the one after it.
            self.pos = Some(start + n - 1);
        }
        batch.length = n;
        batch
    }

    fn err(&self) -> Option<ChunkError> {
        self.acc.err()
    }
}

/// Retrieves all samples within the given closed interval from an iterator.
///
/// Returns whatever was collected together with the iterator's final error
/// state. A non-empty result alongside an error means "best effort, then
/// failure", not success; an empty result with no error means no data fell
/// in the interval.
pub fn range_values(
    it: &mut dyn ChunkIterator,
    interval: Interval,
) -> (Vec<Sample>, Option<ChunkError>) {
    let mut result = Vec::new();
    if !it.find_at_or_after(interval.oldest) {
        return (result, it.err());
    }
    while it.value().timestamp <= interval.newest {
        result.push(it.value());
        if !it.scan() {
            break;
        }
    }
    (result, it.err())
}
