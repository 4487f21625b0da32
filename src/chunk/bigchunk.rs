//! Bigchunk encoding: variable-length, compressed on marshal
//!
//! Unlike the fixed-capacity encodings, a bigchunk keeps its samples decoded
//! in memory and never overflows or transcodes: `add` always mutates and
//! returns the chunk itself. It is the transcode destination of last resort,
//! since it accepts any timestamp pattern.
//!
//! The marshalled form is the engine's standard block compression: timestamps
//! delta-encoded against the first sample, serialized with bincode, LZ4
//! compressed, wrapped in the length + CRC32 envelope shared by all
//! encodings.

use crate::chunk::iterator::{Batch, ChunkIterator, BATCH_SIZE};
use crate::chunk::{AddError, AddResult, Chunk, CHUNK_LEN};
use crate::encoding::Encoding;
use crate::error::{ChunkError, ChunkResult};
use crate::types::{Sample, Timestamp, ZERO_SAMPLE};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// A variable-length chunk of in-memory samples
#[derive(Debug, Clone, Default)]
pub struct Bigchunk {
    samples: Vec<Sample>,
    evicted: bool,
}

/// Marshalled representation before compression
#[derive(Serialize, Deserialize)]
struct EncodedBlock {
    base_timestamp: i64,
    timestamp_deltas: Vec<i64>,
    values: Vec<f64>,
}

impl Bigchunk {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Chunk for Bigchunk {
    fn add(mut self: Box<Self>, sample: Sample) -> AddResult {
        if self.evicted {
            return Err(AddError::new(self, ChunkError::EvictedChunkWrite));
        }
        debug_assert!(
            self.samples
                .last()
                .map_or(true, |last| sample.timestamp > last.timestamp),
            "samples must be appended in strictly increasing timestamp order"
        );
        self.samples.push(sample);
        Ok(vec![self as Box<dyn Chunk>])
    }

    fn new_iterator<'a>(&'a self) -> Box<dyn ChunkIterator + 'a> {
        Box::new(BigchunkIterator {
            samples: &self.samples,
            pos: None,
            last: ZERO_SAMPLE,
        })
    }

    fn marshal(&self, w: &mut dyn Write) -> ChunkResult<()> {
        if self.samples.is_empty() {
            w.write_all(&0u32.to_le_bytes())?;
            w.write_all(&crc32fast::hash(&[]).to_le_bytes())?;
            return Ok(());
        }

        let base_timestamp = self.samples[0].timestamp;
        let block = EncodedBlock {
            base_timestamp,
            timestamp_deltas: self
                .samples
                .windows(2)
                .map(|pair| pair[1].timestamp - pair[0].timestamp)
                .collect(),
            values: self.samples.iter().map(|s| s.value).collect(),
        };
        let serialized =
            bincode::serialize(&block).map_err(|e| ChunkError::Io(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&serialized);

        w.write_all(&(compressed.len() as u32).to_le_bytes())?;
        w.write_all(&compressed)?;
        w.write_all(&crc32fast::hash(&compressed).to_le_bytes())?;
        Ok(())
    }

    fn unmarshal_from_buf(&mut self, buf: &[u8]) -> ChunkResult<()> {
        let data = super::read_envelope(buf)?;
        self.evicted = false;
        if data.is_empty() {
            self.samples.clear();
            return Ok(());
        }

        let serialized = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ChunkError::CorruptData(format!("LZ4 decompression failed: {}", e)))?;
        let block: EncodedBlock = bincode::deserialize(&serialized)
            .map_err(|e| ChunkError::CorruptData(e.to_string()))?;
        if block.values.len() != block.timestamp_deltas.len() + 1 {
            return Err(ChunkError::CorruptData(format!(
                "bigchunk block mismatch: {} values, {} deltas",
                block.values.len(),
                block.timestamp_deltas.len()
            )));
        }

        let mut timestamp = block.base_timestamp;
        self.samples.clear();
        self.samples.reserve(block.values.len());
        for (i, &value) in block.values.iter().enumerate() {
            if i > 0 {
                timestamp += block.timestamp_deltas[i - 1];
            }
            self.samples.push(Sample::new(timestamp, value));
        }
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        Encoding::Bigchunk
    }

    /// Relative to the fixed chunk capacity; a bigchunk can legitimately
    /// exceed it, so the ratio saturates at 1.
    fn utilization(&self) -> f64 {
        (self.size() as f64 / CHUNK_LEN as f64).min(1.0)
    }

    /// Bigchunk is the one encoding where slicing is cheap: the result holds
    /// exactly the samples in the closed interval [start, end].
    fn slice(&self, start: Timestamp, end: Timestamp) -> Box<dyn Chunk> {
        let samples = self
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect();
        Box::new(Bigchunk {
            samples,
            evicted: false,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    /// Approximate marshalled size, assuming the engine's usual ~8x block
    /// compression on top of 16 raw bytes per sample.
    fn size(&self) -> usize {
        self.samples.len() * 2 + 64
    }

    fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    fn is_evicted(&self) -> bool {
        self.evicted
    }
}

/// Custom iterator over the in-memory sample slice. Bigchunk does not go
/// through the index-accessing iterator; direct slice access needs no
/// error plumbing, so `err` is always `None`.
struct BigchunkIterator<'a> {
    samples: &'a [Sample],
    /// Index of the last delivered sample; `None` while fresh
    pos: Option<usize>,
    last: Sample,
}

impl ChunkIterator for BigchunkIterator<'_> {
    fn scan(&mut self) -> bool {
        let next = self.pos.map_or(0, |p| p + 1);
        if next >= self.samples.len() {
            return false;
        }
        self.pos = Some(next);
        self.last = self.samples[next];
        true
    }

    fn find_at_or_after(&mut self, t: Timestamp) -> bool {
        let index = self.samples.partition_point(|s| s.timestamp < t);
        if index == self.samples.len() {
            return false;
        }
        self.pos = Some(index);
        self.last = self.samples[index];
        true
    }

    fn value(&self) -> Sample {
        self.last
    }

    fn batch(&mut self, size: usize) -> Batch {
        let mut batch = Batch::default();
        let size = size.min(BATCH_SIZE);
        let start = self.pos.unwrap_or(0);
        let mut n = 0;
        while n < size && start + n < self.samples.len() {
            let sample = self.samples[start + n];
            batch.timestamps[n] = sample.timestamp;
            batch.values[n] = sample.value;
            n += 1;
        }
        if n > 0 {
            self.pos = Some(start + n - 1);
        }
        batch.length = n;
        batch
    }

    fn err(&self) -> Option<ChunkError> {
        None
    }
}
