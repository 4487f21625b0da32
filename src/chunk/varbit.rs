//! Varbit encoding: Gorilla-style bit-packed timestamps and values
//!
//! Stream layout:
//! - first sample: raw 64-bit timestamp, raw 64-bit value
//! - subsequent timestamps: delta-of-delta in variable-width bit classes
//!   ('0' for zero, then '10'+7, '110'+9, '1110'+12 bits sign-extended,
//!   '1111'+64 bits for anything larger)
//! - subsequent values: XOR against the previous value; '0' for identical,
//!   '10' reuses the previous leading/trailing-zero window, '11' writes a
//!   5-bit leading count and 6-bit significant-bit length (64 stored as 0)
//!   followed by the significant bits
//!
//! The stream has no random access, so `new_iterator` decodes it up front
//! into an owned accessor; a decode failure becomes the accessor's sticky
//! `CorruptData` error and the chunk should be quarantined.

use crate::chunk::iterator::{ChunkIterator, IndexAccessor, IndexIterator};
use crate::chunk::layout::get_u16;
use crate::chunk::{add_to_overflow, AddError, AddResult, Chunk, CHUNK_LEN};
use crate::encoding::Encoding;
use crate::error::{ChunkError, ChunkResult};
use crate::types::{Sample, Timestamp};
use std::cell::RefCell;
use std::io::Write;

/// Sentinel for "no XOR window established yet"
const NO_WINDOW: u8 = u8::MAX;

/// Worst case bits for one sample: 4+64 for the timestamp class,
/// 2+5+6+64 for a full XOR block.
const MAX_SAMPLE_BITS: usize = 145;

/// A varbit-encoded chunk
#[derive(Debug, Clone)]
pub struct VarbitChunk {
    stream: Vec<u8>,
    /// Bits written so far (the final byte may be partial)
    bits: usize,
    count: u16,
    evicted: bool,
    // Append state, rebuilt from the stream on unmarshal.
    last_time: i64,
    last_tdelta: i64,
    last_value: f64,
    leading: u8,
    trailing: u8,
}

impl VarbitChunk {
    pub fn new() -> Self {
        Self {
            stream: Vec::with_capacity(128),
            bits: 0,
            count: 0,
            evicted: false,
            last_time: 0,
            last_tdelta: 0,
            last_value: 0.0,
            leading: NO_WINDOW,
            trailing: 0,
        }
    }

    fn write_bit(&mut self, bit: bool) {
        let byte_index = self.bits / 8;
        if byte_index == self.stream.len() {
            self.stream.push(0);
        }
        if bit {
            self.stream[byte_index] |= 1 << (7 - (self.bits % 8));
        }
        self.bits += 1;
    }

    fn write_bits(&mut self, value: u64, count: u8) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn write_dod(&mut self, dod: i64) {
        if dod == 0 {
            self.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            self.write_bits(0b10, 2);
            self.write_bits(dod as u64 & 0x7f, 7);
        } else if (-255..=256).contains(&dod) {
            self.write_bits(0b110, 3);
            self.write_bits(dod as u64 & 0x1ff, 9);
        } else if (-2047..=2048).contains(&dod) {
            self.write_bits(0b1110, 4);
            self.write_bits(dod as u64 & 0xfff, 12);
        } else {
            self.write_bits(0b1111, 4);
            self.write_bits(dod as u64, 64);
        }
    }

    fn write_xor_value(&mut self, value: f64) {
        let xor = value.to_bits() ^ self.last_value.to_bits();
        if xor == 0 {
            self.write_bit(false);
            return;
        }
        self.write_bit(true);

        // The leading count must fit its 5-bit field.
        let leading = (xor.leading_zeros() as u8).min(31);
        let trailing = xor.trailing_zeros() as u8;

        if self.leading != NO_WINDOW && leading >= self.leading && trailing >= self.trailing {
            // Reuse the established window.
            self.write_bit(false);
            let significant = 64 - self.leading - self.trailing;
            self.write_bits(xor >> self.trailing, significant);
        } else {
            self.write_bit(true);
            self.write_bits(leading as u64, 5);
            let significant = 64 - leading - trailing;
            // significant is in 1..=64; 64 is stored as 0 in the 6-bit field.
            self.write_bits(significant as u64 & 0x3f, 6);
            self.write_bits(xor >> trailing, significant);
            self.leading = leading;
            self.trailing = trailing;
        }
    }

    fn decode_all(&self) -> ChunkResult<Vec<Sample>> {
        let mut samples = Vec::with_capacity(self.count as usize);
        if self.count == 0 {
            return Ok(samples);
        }
        let mut r = BitReader::new(&self.stream, self.bits);

        let mut t = r.read_bits(64)? as i64;
        let mut value_bits = r.read_bits(64)?;
        samples.push(Sample::new(t, f64::from_bits(value_bits)));

        let mut tdelta = 0i64;
        let mut leading = 0u8;
        let mut trailing = 0u8;

        for _ in 1..self.count {
            tdelta += read_dod(&mut r)?;
            t += tdelta;

            if r.read_bit()? {
                if r.read_bit()? {
                    leading = r.read_bits(5)? as u8;
                    let mut significant = r.read_bits(6)? as u8;
                    if significant == 0 {
                        significant = 64;
                    }
                    if leading as u32 + significant as u32 > 64 {
                        return Err(ChunkError::CorruptData(
                            "varbit xor block wider than 64 bits".to_string(),
                        ));
                    }
                    trailing = 64 - leading - significant;
                }
                let significant = 64 - leading - trailing;
                let xor = r.read_bits(significant)?;
                value_bits ^= xor << trailing;
            }
            samples.push(Sample::new(t, f64::from_bits(value_bits)));
        }
        Ok(samples)
    }
}

impl Default for VarbitChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk for VarbitChunk {
    fn add(mut self: Box<Self>, sample: Sample) -> AddResult {
        if self.evicted {
            return Err(AddError::new(self, ChunkError::EvictedChunkWrite));
        }
        if self.count == 0 {
            self.write_bits(sample.timestamp as u64, 64);
            self.write_bits(sample.value.to_bits(), 64);
            self.last_time = sample.timestamp;
            self.last_tdelta = 0;
            self.last_value = sample.value;
            self.count = 1;
            return Ok(vec![self as Box<dyn Chunk>]);
        }

        debug_assert!(
            sample.timestamp > self.last_time,
            "samples must be appended in strictly increasing timestamp order"
        );

        // Reserve worst case space so a partially written sample never has
        // to be rolled back.
        if (self.bits + MAX_SAMPLE_BITS).div_ceil(8) > CHUNK_LEN {
            return add_to_overflow(self, sample);
        }

        let tdelta = sample.timestamp - self.last_time;
        self.write_dod(tdelta - self.last_tdelta);
        self.write_xor_value(sample.value);
        self.last_time = sample.timestamp;
        self.last_tdelta = tdelta;
        self.last_value = sample.value;
        self.count += 1;
        Ok(vec![self as Box<dyn Chunk>])
    }

    fn new_iterator<'a>(&'a self) -> Box<dyn ChunkIterator + 'a> {
        match self.decode_all() {
            Ok(samples) => {
                let len = samples.len();
                Box::new(IndexIterator::new(len, VarbitAccessor::new(samples, None)))
            }
            Err(err) => Box::new(IndexIterator::new(
                0,
                VarbitAccessor::new(Vec::new(), Some(err)),
            )),
        }
    }

    fn marshal(&self, w: &mut dyn Write) -> ChunkResult<()> {
        let mut data = Vec::with_capacity(6 + self.stream.len());
        data.extend_from_slice(&self.count.to_le_bytes());
        data.extend_from_slice(&(self.bits as u32).to_le_bytes());
        data.extend_from_slice(&self.stream);

        w.write_all(&(data.len() as u32).to_le_bytes())?;
        w.write_all(&data)?;
        w.write_all(&crc32fast::hash(&data).to_le_bytes())?;
        Ok(())
    }

    fn unmarshal_from_buf(&mut self, buf: &[u8]) -> ChunkResult<()> {
        let data = super::read_envelope(buf)?;
        if data.len() < 6 {
            return Err(ChunkError::CorruptData(
                "varbit chunk header truncated".to_string(),
            ));
        }
        let count = get_u16(data, 0);
        let bits =
            u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
        let stream = &data[6..];
        if stream.len() != bits.div_ceil(8) {
            return Err(ChunkError::CorruptData(format!(
                "varbit stream length mismatch: {} bits in {} bytes",
                bits,
                stream.len()
            )));
        }

        self.stream = stream.to_vec();
        self.bits = bits;
        self.count = count;
        self.evicted = false;

        // Rebuild append state from the decoded tail. The XOR window resets,
        // which only costs one fresh window block on the next add.
        let samples = self.decode_all()?;
        if let Some(last) = samples.last() {
            self.last_time = last.timestamp;
            self.last_value = last.value;
        }
        self.last_tdelta = if samples.len() >= 2 {
            samples[samples.len() - 1].timestamp - samples[samples.len() - 2].timestamp
        } else {
            0
        };
        self.leading = NO_WINDOW;
        self.trailing = 0;
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        Encoding::Varbit
    }

    fn utilization(&self) -> f64 {
        self.stream.len() as f64 / CHUNK_LEN as f64
    }

    /// Slicing a bit stream means re-encoding; the unmodified chunk is a
    /// documented over-approximation of [start, end].
    fn slice(&self, _start: Timestamp, _end: Timestamp) -> Box<dyn Chunk> {
        Box::new(self.clone())
    }

    fn len(&self) -> usize {
        self.count as usize
    }

    fn size(&self) -> usize {
        self.stream.len()
    }

    fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    fn is_evicted(&self) -> bool {
        self.evicted
    }
}

/// Accessor over the eagerly decoded stream. Owning the samples keeps index
/// access O(1) at the cost of one decode per iterator.
struct VarbitAccessor {
    samples: Vec<Sample>,
    error: RefCell<Option<ChunkError>>,
}

impl VarbitAccessor {
    fn new(samples: Vec<Sample>, error: Option<ChunkError>) -> Self {
        Self {
            samples,
            error: RefCell::new(error),
        }
    }
}

impl IndexAccessor for VarbitAccessor {
    fn timestamp_at(&self, index: usize) -> Timestamp {
        match self.samples.get(index) {
            Some(sample) => sample.timestamp,
            None => {
                *self.error.borrow_mut() = Some(ChunkError::BoundsExceeded);
                0
            }
        }
    }

    fn value_at(&self, index: usize) -> f64 {
        match self.samples.get(index) {
            Some(sample) => sample.value,
            None => {
                *self.error.borrow_mut() = Some(ChunkError::BoundsExceeded);
                0.0
            }
        }
    }

    fn err(&self) -> Option<ChunkError> {
        self.error.borrow().clone()
    }
}

struct BitReader<'a> {
    buf: &'a [u8],
    len_bits: usize,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8], len_bits: usize) -> Self {
        Self {
            buf,
            len_bits,
            pos: 0,
        }
    }

    fn read_bit(&mut self) -> ChunkResult<bool> {
        if self.pos >= self.len_bits {
            return Err(ChunkError::CorruptData(
                "varbit stream truncated".to_string(),
            ));
        }
        let bit = (self.buf[self.pos / 8] >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u8) -> ChunkResult<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }
}

fn read_dod(r: &mut BitReader<'_>) -> ChunkResult<i64> {
    let mut control = 0u8;
    while control < 4 && r.read_bit()? {
        control += 1;
    }
    match control {
        0 => Ok(0),
        1 => Ok(sign_extend(r.read_bits(7)?, 7)),
        2 => Ok(sign_extend(r.read_bits(9)?, 9)),
        3 => Ok(sign_extend(r.read_bits(12)?, 12)),
        _ => Ok(r.read_bits(64)? as i64),
    }
}

/// Interpret the low `bits` bits of `value` as a two's-complement integer
/// centered on the encoder's `(-(2^(bits-1) - 1))..=2^(bits-1)` range.
fn sign_extend(value: u64, bits: u8) -> i64 {
    if value > (1 << (bits - 1)) {
        value as i64 - (1i64 << bits)
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::tests::{add_all, drain};
    use crate::metrics::global_state_lock;

    #[test]
    fn test_constant_values_compress_to_single_bits() {
        // Steady 15s scrape of a flat gauge: after the first sample, each
        // one costs a '0' dod bit and a '0' xor bit.
        let samples: Vec<Sample> = (0..100)
            .map(|i| Sample::new(1700000000000 + i * 15000, 42.0))
            .collect();
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].size() < 64, "expected tight packing, got {} bytes", chunks[0].size());
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_varying_series_round_trips() {
        let mut t = 1700000000000i64;
        let mut samples = Vec::new();
        for i in 0..200 {
            t += 15000 + [-120, 37, 0, 81, -9, 3, -44][i % 7];
            samples.push(Sample::new(t, (i as f64 * 0.17).sin() * 1000.0));
        }
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();
        assert_eq!(chunks[0].encoding(), Encoding::Varbit);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_extreme_dod_and_value_jumps() {
        let samples = vec![
            Sample::new(-5000, f64::MIN_POSITIVE),
            Sample::new(1000, 0.0),
            Sample::new(2000, f64::MAX),
            Sample::new(1_000_000_000, -12.5),
            Sample::new(1_000_000_015, -12.5),
        ];
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_overflow_produces_chain() {
        let _guard = global_state_lock();
        // Random-ish values defeat XOR compression, forcing wide blocks.
        let samples: Vec<Sample> = (0..600)
            .map(|i| Sample::new(i * 1000, (i as f64 * 987.6543).fract() * 1e9))
            .collect();
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();

        assert!(chunks.len() >= 2, "expected overflow, got {} chunk(s)", chunks.len());
        assert!(chunks[0].size() <= CHUNK_LEN);
        assert_eq!(drain(&chunks), samples);
    }

    #[test]
    fn test_marshal_round_trip_and_continued_append() {
        let samples: Vec<Sample> = (0..50)
            .map(|i| Sample::new(1700000000000 + i * 15000, 20.0 + (i as f64 * 0.5).cos()))
            .collect();
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();

        let mut bytes = Vec::new();
        chunks[0].marshal(&mut bytes).unwrap();

        let mut restored = VarbitChunk::new();
        restored.unmarshal_from_buf(&bytes).unwrap();
        assert_eq!(restored.len(), samples.len());
        assert_eq!(
            drain(&[Box::new(restored.clone()) as Box<dyn Chunk>]),
            samples
        );

        // Appending after unmarshal continues the stream.
        let next = Sample::new(1700000000000 + 50 * 15000, 99.0);
        let chunks = (Box::new(restored) as Box<dyn Chunk>).add(next).unwrap();
        let mut expected = samples;
        expected.push(next);
        assert_eq!(drain(&chunks), expected);
    }

    #[test]
    fn test_truncated_stream_surfaces_corruption() {
        let samples: Vec<Sample> = (0..20)
            .map(|i| Sample::new(1000 + i * 250, i as f64))
            .collect();
        let chunks = add_all(Box::new(VarbitChunk::new()), &samples).unwrap();

        let mut bytes = Vec::new();
        chunks[0].marshal(&mut bytes).unwrap();

        // Corrupt the stored bit length so decoding runs off the end.
        let mut restored = VarbitChunk::new();
        restored.unmarshal_from_buf(&bytes).unwrap();
        restored.bits /= 2;
        restored.stream.truncate(restored.bits.div_ceil(8));

        let mut it = restored.new_iterator();
        assert!(!it.scan());
        assert!(matches!(it.err(), Some(ChunkError::CorruptData(_))));
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(64, 7), 64);
        assert_eq!(sign_extend(65, 7), -63);
        assert_eq!(sign_extend(0, 7), 0);
        assert_eq!(sign_extend(511, 9), -1);
        assert_eq!(sign_extend(256, 9), 256);
    }

    #[test]
    fn test_add_to_evicted_chunk_fails() {
        let mut chunk = VarbitChunk::new();
        chunk.mark_evicted();
        let err = Box::new(chunk).add(Sample::new(1000, 1.0)).unwrap_err();
        assert_eq!(err.source, ChunkError::EvictedChunkWrite);
        assert!(err.chunk.is_evicted());
    }
}
