//! Delta encoding: fixed-width offsets from a base timestamp
//!
//! Layout (inside the 1024-byte buffer):
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (10 bytes)                    │
//! │   count: u16                         │
//! │   base_time: i64                     │
//! ├──────────────────────────────────────┤
//! │ RECORDS (12 bytes each)              │
//! │   time_offset: u32  (ms from base)   │
//! │   value: f64                         │
//! └──────────────────────────────────────┘
//! ```
//!
//! Random index access is O(1), so the chunk gets its iterator from
//! [`IndexIterator`]. When the time span outgrows the u32 offset field the
//! chunk signals a representation switch and transcodes to double-delta,
//! which handles long regular series with small per-record deviations.

use crate::chunk::double_delta::DoubleDeltaChunk;
use crate::chunk::iterator::{ChunkIterator, IndexAccessor, IndexIterator};
use crate::chunk::layout::{get_f64, get_i64, get_u16, get_u32, put_i64, put_u16};
use crate::chunk::{add_to_overflow, transcode_and_add, AddError, AddResult, Chunk, CHUNK_LEN};
use crate::encoding::Encoding;
use crate::error::{ChunkError, ChunkResult};
use crate::types::{Sample, Timestamp};
use std::cell::RefCell;
use std::io::Write;

const HEADER_SIZE: usize = 10;
const RECORD_SIZE: usize = 12;

const COUNT_OFFSET: usize = 0;
const BASE_TIME_OFFSET: usize = 2;

/// A delta-encoded chunk
#[derive(Debug, Clone)]
pub struct DeltaChunk {
    buf: Vec<u8>,
    evicted: bool,
}

impl DeltaChunk {
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

    fn set_base_time(&mut self, t: i64) {
        put_i64(&mut self.buf, BASE_TIME_OFFSET, t);
    }

    fn record_offset(index: usize) -> usize {
        HEADER_SIZE + index * RECORD_SIZE
    }

    fn timestamp_at(&self, index: usize) -> Timestamp {
        self.base_time() + get_u32(&self.buf, Self::record_offset(index)) as i64
    }

    fn value_at(&self, index: usize) -> f64 {
        get_f64(&self.buf, Self::record_offset(index) + 4)
    }

    fn push_record(&mut self, time_offset: u32, value: f64) {
        self.buf.extend_from_slice(&time_offset.to_le_bytes());
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
}

impl Default for DeltaChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk for DeltaChunk {
    fn add(mut self: Box<Self>, sample: Sample) -> AddResult {
        if self.evicted {
            return Err(AddError::new(self, ChunkError::EvictedChunkWrite));
        }
        let count = self.count();
        if count == 0 {
            self.set_base_time(sample.timestamp);
            self.push_record(0, sample.value);
            self.set_count(1);
            return Ok(vec![self as Box<dyn Chunk>]);
        }

        debug_assert!(
            sample.timestamp > self.timestamp_at(count - 1),
            "samples must be appended in strictly increasing timestamp order"
        );

        let offset = sample.timestamp - self.base_time();
        if offset > u32::MAX as i64 {
            // The span no longer fits the fixed-width offset field; switch
            // representation instead of silently losing precision. A failed
            // transcode hands this chunk back untouched.
            return match transcode_and_add(Box::new(DoubleDeltaChunk::new()), &*self, sample) {
                Ok(chain) => Ok(chain),
                Err(err) => Err(AddError::new(self, err)),
            };
        }
        if Self::record_offset(count + 1) > CHUNK_LEN {
            return add_to_overflow(self, sample);
        }

        self.push_record(offset as u32, sample.value);
        self.set_count((count + 1) as u16);
        Ok(vec![self as Box<dyn Chunk>])
    }

    fn new_iterator<'a>(&'a self) -> Box<dyn ChunkIterator + 'a> {
        Box::new(IndexIterator::new(self.count(), DeltaAccessor::new(self)))
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
                "delta chunk header truncated".to_string(),
            ));
        }
        let count = get_u16(data, COUNT_OFFSET) as usize;
        if Self::record_offset(count) != data.len() {
            return Err(ChunkError::CorruptData(format!(
                "delta chunk length mismatch: {} samples in {} bytes",
                count,
                data.len()
            )));
        }
        self.buf = data.to_vec();
        self.evicted = false;
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        Encoding::Delta
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

struct DeltaAccessor<'a> {
    chunk: &'a DeltaChunk,
    error: RefCell<Option<ChunkError>>,
}

impl<'a> DeltaAccessor<'a> {
    fn new(chunk: &'a DeltaChunk) -> Self {
        Self {
            chunk,
            error: RefCell::new(None),
        }
    }
}

impl IndexAccessor for DeltaAccessor<'_> {
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

    /// Samples per chunk with the 10-byte header and 12-byte records.
    const CAPACITY: usize = (CHUNK_LEN - HEADER_SIZE) / RECORD_SIZE;

    #[test]
    fn test_add_and_iterate() {
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::new(1000 + i * 500, i as f64 * 1.5))
            .collect();
        let chunks = add_all(Box::new(DeltaChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].encoding(), Encoding::Delta);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_overflow_produces_chain() {
        let _guard = global_state_lock();
        let samples: Vec<Sample> = (0..(CAPACITY as i64 + 10))
            .map(|i| Sample::new(i * 1000, i as f64))
            .collect();
        let chunks = add_all(Box::new(DeltaChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CAPACITY);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_wide_time_span_transcodes() {
        let _guard = global_state_lock();
        let mut chunks = add_all(
            Box::new(DeltaChunk::new()),
            &[Sample::new(0, 1.0), Sample::new(1000, 2.0)],
        )
        .unwrap();

        // An offset beyond u32::MAX milliseconds cannot be delta encoded.
        let far = Sample::new(u32::MAX as i64 + 1000, 3.0);
        chunks = chunks.pop().unwrap().add(far).unwrap();

        assert_ne!(chunks.last().unwrap().encoding(), Encoding::Delta);
        assert_eq!(
            drain(&chunks),
            vec![Sample::new(0, 1.0), Sample::new(1000, 2.0), far]
        );
    }

    #[test]
    fn test_marshal_round_trip() {
        let samples: Vec<Sample> = (0..50)
            .map(|i| Sample::new(1700000000000 + i * 15000, 20.0 + i as f64 * 0.1))
            .collect();
        let chunks = add_all(Box::new(DeltaChunk::new()), &samples).unwrap();

        let mut bytes = Vec::new();
        chunks[0].marshal(&mut bytes).unwrap();

        let mut restored = DeltaChunk::new();
        restored.unmarshal_from_buf(&bytes).unwrap();

        assert_eq!(restored.encoding(), Encoding::Delta);
        assert_eq!(restored.len(), samples.len());
        assert_eq!(drain(&[Box::new(restored) as Box<dyn Chunk>]), samples);
    }

    #[test]
    fn test_unmarshal_detects_corruption() {
        let chunks = add_all(
            Box::new(DeltaChunk::new()),
            &[Sample::new(1000, 1.0), Sample::new(2000, 2.0)],
        )
        .unwrap();

        let mut bytes = Vec::new();
        chunks[0].marshal(&mut bytes).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;

        let mut restored = DeltaChunk::new();
        let err = restored.unmarshal_from_buf(&bytes).unwrap_err();
        assert!(matches!(err, ChunkError::CorruptData(_)));
    }

    #[test]
    fn test_add_to_evicted_chunk_fails() {
        let mut chunk = DeltaChunk::new();
        chunk.mark_evicted();
        let err = Box::new(chunk).add(Sample::new(1000, 1.0)).unwrap_err();
        assert_eq!(err.source, ChunkError::EvictedChunkWrite);
        assert!(err.chunk.is_evicted());
    }

    #[test]
    fn test_utilization_grows_with_samples() {
        let chunks = add_all(
            Box::new(DeltaChunk::new()),
            &[Sample::new(1000, 1.0), Sample::new(2000, 2.0)],
        )
        .unwrap();
        let u = chunks[0].utilization();
        assert!(u > 0.0 && u < 1.0);
    }
}
