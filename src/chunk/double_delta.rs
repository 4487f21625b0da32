//! Double-delta encoding: deviations from a linear timestamp prediction
//!
//! Layout (inside the 1024-byte buffer):
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ HEADER (18 bytes)                          │
//! │   count: u16                               │
//! │   base_time: i64    (first timestamp)      │
//! │   base_tdelta: i64  (first inter-sample    │
//! │                      delta, fixed after    │
//! │                      the second add)       │
//! ├────────────────────────────────────────────┤
//! │ RECORDS (12 bytes each)                    │
//! │   deviation: i32  (from base_time +        │
//! │                    i * base_tdelta)        │
//! │   value: f64                               │
//! └────────────────────────────────────────────┘
//! ```
//!
//! Storing each record's deviation from the linear prediction rather than a
//! cumulative delta-of-delta keeps `timestamp_at` O(1), so the chunk shares
//! the generic index-accessing iterator. Regularly spaced series produce
//! tiny deviations regardless of total span; when a deviation outgrows i32
//! the chunk transcodes to bigchunk, which holds anything.

use crate::chunk::bigchunk::Bigchunk;
use crate::chunk::iterator::{ChunkIterator, IndexAccessor, IndexIterator};
use crate::chunk::layout::{get_f64, get_i32, get_i64, get_u16, put_i64, put_u16};
use crate::chunk::{add_to_overflow, transcode_and_add, AddError, AddResult, Chunk, CHUNK_LEN};
use crate::encoding::Encoding;
use crate::error::{ChunkError, ChunkResult};
use crate::types::{Sample, Timestamp};
use std::cell::RefCell;
use std::io::Write;

const HEADER_SIZE: usize = 18;
const RECORD_SIZE: usize = 12;

const COUNT_OFFSET: usize = 0;
const BASE_TIME_OFFSET: usize = 2;
const BASE_TDELTA_OFFSET: usize = 10;

/// A double-delta-encoded chunk
#[derive(Debug, Clone)]
pub struct DoubleDeltaChunk {
    buf: Vec<u8>,
    evicted: bool,
}

impl DoubleDeltaChunk {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(CHUNK_LEN);
        buf.resize(HEADER_SIZE, 0);
        Self {
            buf,
            evicted: false,
        }
    }

    fn count(&self) -> usize {
        get_u16(&self.buf, COUNT_OFFSET) as usize
    }

    fn set_count(&mut self, count: u16) {
        put_u16(&mut self.buf, COUNT_OFFSET, count);
    }

    fn base_time(&self) -> i64 {
        get_i64(&self.buf, BASE_TIME_OFFSET)
    }

    fn base_tdelta(&self) -> i64 {
        get_i64(&self.buf, BASE_TDELTA_OFFSET)
    }

    fn record_offset(index: usize) -> usize {
        HEADER_SIZE + index * RECORD_SIZE
    }

    fn prediction(&self, index: usize) -> i64 {
        self.base_time() + index as i64 * self.base_tdelta()
    }

    fn timestamp_at(&self, index: usize) -> Timestamp {
        self.prediction(index) + get_i32(&self.buf, Self::record_offset(index)) as i64
    }

    fn value_at(&self, index: usize) -> f64 {
        get_f64(&self.buf, Self::record_offset(index) + 4)
    }

    fn push_record(&mut self, deviation: i32, value: f64) {
        self.buf.extend_from_slice(&deviation.to_le_bytes());
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
}

impl Default for DoubleDeltaChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk for DoubleDeltaChunk {
    fn add(mut self: Box<Self>, sample: Sample) -> AddResult {
        if self.evicted {
            return Err(AddError::new(self, ChunkError::EvictedChunkWrite));
        }
        let count = self.count();
        match count {
            0 => {
                put_i64(&mut self.buf, BASE_TIME_OFFSET, sample.timestamp);
                self.push_record(0, sample.value);
            }
            1 => {
                debug_assert!(
                    sample.timestamp > self.base_time(),
                    "samples must be appended in strictly increasing timestamp order"
                );
                let tdelta = sample.timestamp - self.base_time();
                put_i64(&mut self.buf, BASE_TDELTA_OFFSET, tdelta);
                self.push_record(0, sample.value);
            }
            _ => {
                debug_assert!(
                    sample.timestamp > self.timestamp_at(count - 1),
                    "samples must be appended in strictly increasing timestamp order"
                );
                let deviation = sample.timestamp - self.prediction(count);
                if deviation < i32::MIN as i64 || deviation > i32::MAX as i64 {
                    // The series drifted too far from the linear prediction
                    // for the fixed-width field; switch representation. A
                    // failed transcode hands this chunk back untouched.
                    return match transcode_and_add(Box::new(Bigchunk::new()), &*self, sample) {
                        Ok(chain) => Ok(chain),
                        Err(err) => Err(AddError::new(self, err)),
                    };
                }
                if Self::record_offset(count + 1) > CHUNK_LEN {
                    return add_to_overflow(self, sample);
                }
                self.push_record(deviation as i32, sample.value);
            }
        }
        self.set_count((count + 1) as u16);
        Ok(vec![self as Box<dyn Chunk>])
    }

    fn new_iterator<'a>(&'a self) -> Box<dyn ChunkIterator + 'a> {
        Box::new(IndexIterator::new(
            self.count(),
            DoubleDeltaAccessor::new(self),
        ))
    }

    fn marshal(&self, w: &mut dyn Write) -> ChunkResult<()> {
        w.write_all(&(self.buf.len() as u32).to_le_bytes())?;
        w.write_all(&self.buf)?;
        w.write_all(&crc32fast::hash(&self.buf).to_le_bytes())?;
        Ok(())
    }

    fn unmarshal_from_buf(&mut self, buf: &[u8]) -> ChunkResult<()> {
        let data = super::read_envelope(buf)?;
        if data.len() < HEADER_SIZE {
            return Err(ChunkError::CorruptData(
                "double-delta chunk header truncated".to_string(),
            ));
        }
        let count = get_u16(data, COUNT_OFFSET) as usize;
        if Self::record_offset(count) != data.len() {
            return Err(ChunkError::CorruptData(format!(
                "double-delta chunk length mismatch: {} samples in {} bytes",
                count,
                data.len()
            )));
        }
        self.buf = data.to_vec();
        self.evicted = false;
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        Encoding::DoubleDelta
    }

    fn utilization(&self) -> f64 {
        self.buf.len() as f64 / CHUNK_LEN as f64
    }

    /// Slicing a fixed-width chunk is not cost-effective; the unmodified
    /// chunk is a documented over-approximation of [start, end].
    fn slice(&self, _start: Timestamp, _end: Timestamp) -> Box<dyn Chunk> {
        Box::new(self.clone())
    }

    fn len(&self) -> usize {
        self.count()
    }

    fn size(&self) -> usize {
        self.buf.len()
    }

    fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    fn is_evicted(&self) -> bool {
        self.evicted
    }
}

struct DoubleDeltaAccessor<'a> {
    chunk: &'a DoubleDeltaChunk,
    error: RefCell<Option<ChunkError>>,
}

impl<'a> DoubleDeltaAccessor<'a> {
    fn new(chunk: &'a DoubleDeltaChunk) -> Self {
        Self {
            chunk,
            error: RefCell::new(None),
        }
    }
}

impl IndexAccessor for DoubleDeltaAccessor<'_> {
    fn timestamp_at(&self, index: usize) -> Timestamp {
        if index >= self.chunk.count() {
            *self.error.borrow_mut() = Some(ChunkError::BoundsExceeded);
            return 0;
        }
        self.chunk.timestamp_at(index)
    }

    fn value_at(&self, index: usize) -> f64 {
        if index >= self.chunk.count() {
            *self.error.borrow_mut() = Some(ChunkError::BoundsExceeded);
            return 0.0;
        }
        self.chunk.value_at(index)
    }

    fn err(&self) -> Option<ChunkError> {
        self.error.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::tests::{add_all, drain};
    use crate::metrics::global_state_lock;

    const CAPACITY: usize = (CHUNK_LEN - HEADER_SIZE) / RECORD_SIZE;

    #[test]
    fn test_regular_series_round_trips() {
        let samples: Vec<Sample> = (0..60)
            .map(|i| Sample::new(1700000000000 + i * 15000, (i as f64 * 0.3).sin()))
            .collect();
        let chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].encoding(), Encoding::DoubleDelta);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_irregular_intervals_preserved() {
        // Jittery scrape intervals around a 15s cadence.
        let mut t = 1700000000000i64;
        let mut samples = Vec::new();
        for i in 0..40 {
            t += 15000 + [-70, 13, 0, 42, -5][i % 5];
            samples.push(Sample::new(t, i as f64));
        }
        let chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_long_span_stays_double_delta() {
        // A year of hourly samples spans far beyond u32 milliseconds, but the
        // deviations from the linear prediction are all zero.
        let samples: Vec<Sample> = (0..80)
            .map(|i| Sample::new(i * 3_600_000 * 100, i as f64))
            .collect();
        let chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].encoding(), Encoding::DoubleDelta);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_overflow_produces_chain() {
        let _guard = global_state_lock();
        let samples: Vec<Sample> = (0..(CAPACITY as i64 + 5))
            .map(|i| Sample::new(i * 1000, i as f64))
            .collect();
        let chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CAPACITY);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_large_deviation_transcodes_to_bigchunk() {
        let _guard = global_state_lock();
        let mut samples = vec![
            Sample::new(0, 1.0),
            Sample::new(1000, 2.0),
            Sample::new(2000, 3.0),
        ];
        let mut chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();

        // Deviation from the predicted 3000 exceeds i32.
        let far = Sample::new(i32::MAX as i64 + 10_000, 4.0);
        samples.push(far);
        chunks = chunks.pop().unwrap().add(far).unwrap();

        assert_eq!(chunks.last().unwrap().encoding(), Encoding::Bigchunk);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_marshal_round_trip() {
        let samples: Vec<Sample> = (0..30)
            .map(|i| Sample::new(1700000000000 + i * 60000, 100.0 - i as f64))
            .collect();
        let chunks = add_all(Box::new(DoubleDeltaChunk::new()), &samples).unwrap();

        let mut bytes = Vec::new();
        chunks[0].marshal(&mut bytes).unwrap();

        let mut restored = DoubleDeltaChunk::new();
        restored.unmarshal_from_buf(&bytes).unwrap();

        assert_eq!(restored.len(), samples.len());
        assert_eq!(drain(&[Box::new(restored) as Box<dyn Chunk>]), samples);
    }

    #[test]
    fn test_add_to_evicted_chunk_fails() {
        let mut chunk = DoubleDeltaChunk::new();
        chunk.mark_evicted();
        let err = Box::new(chunk).add(Sample::new(1000, 1.0)).unwrap_err();
        assert_eq!(err.source, ChunkError::EvictedChunkWrite);
        assert!(err.chunk.is_evicted());
    }
}
