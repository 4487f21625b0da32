//! Chunk contract, encoding registry, overflow, and transcoding
//!
//! A chunk is an opaque, fixed-byte-capacity container of time-ordered
//! sample pairs. This module defines the capability set every concrete
//! encoding implements, the factory that builds chunks from encoding tags,
//! and the two algorithms that govern chunk growth:
//!
//! - **overflow**: a full chunk gains a fresh chunk at the default encoding
//!   and the pair becomes a chain;
//! - **transcoding**: a chunk that has outgrown its representation replays
//!   its samples into a chunk of a different encoding.
//!
//! Chunks are generally not safe for concurrent use; the storage manager
//! enforces single-writer, single-active-reader discipline.

mod bigchunk;
mod delta;
mod double_delta;
pub mod iterator;
mod layout;
mod varbit;

pub use bigchunk::Bigchunk;
pub use delta::DeltaChunk;
pub use double_delta::DoubleDeltaChunk;
pub use iterator::{
    range_values, Batch, ChunkIterator, IndexAccessor, IndexIterator, BATCH_SIZE,
};
pub use varbit::VarbitChunk;

use crate::encoding::{default_encoding, Encoding};
use crate::error::{ChunkError, ChunkResult};
use crate::metrics;
use crate::types::{Sample, Timestamp};
use std::fmt::Debug;
use std::io::Write;
use thiserror::Error;

/// Byte capacity of a chunk. Bigchunk is the one encoding allowed to exceed
/// it.
pub const CHUNK_LEN: usize = 1024;

/// A failed [`Chunk::add`]. The chunk the call consumed rides along with
/// the cause, its stored data unchanged, so a rejected write never destroys
/// a chunk the storage manager still serves reads from.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct AddError {
    /// The chunk the failed add consumed, contents unchanged
    pub chunk: Box<dyn Chunk>,
    #[source]
    pub source: ChunkError,
}

impl AddError {
    pub fn new(chunk: Box<dyn Chunk>, source: ChunkError) -> Self {
        Self { chunk, source }
    }
}

impl From<AddError> for ChunkError {
    fn from(err: AddError) -> Self {
        err.source
    }
}

/// Result of appending a sample: the chunk's new chain, or the unmodified
/// chunk together with the cause of the failure.
pub type AddResult = Result<Vec<Box<dyn Chunk>>, AddError>;

/// The capability set every concrete encoding implements.
pub trait Chunk: Debug + Send {
    /// Append one sample, performing any necessary re-encoding and adding
    /// any necessary overflow chunks. Consumes the chunk and returns its new
    /// canonical representation: a chain of one or more chunks the caller
    /// must use, in order, in place of the one it held.
    ///
    /// Precondition: `sample.timestamp` is strictly greater than the last
    /// stored timestamp. Out-of-order appends are a caller bug, rejected by
    /// a debug assertion rather than silently reordered.
    ///
    /// Fails with [`ChunkError::EvictedChunkWrite`] once the storage manager
    /// has marked the chunk evicted. Failure hands the chunk back through
    /// [`AddError`] with its stored data unchanged, so reads keep being
    /// served after the rejected write.
    fn add(self: Box<Self>, sample: Sample) -> AddResult;

    /// A fresh cursor over the chunk's samples. The borrow keeps the chunk
    /// immutable for the iterator's lifetime.
    fn new_iterator<'a>(&'a self) -> Box<dyn ChunkIterator + 'a>;

    /// Write the chunk's binary form. `unmarshal_from_buf(marshal(c))`
    /// reproduces a chunk with identical encoding, length, and iterated
    /// sequence.
    fn marshal(&self, w: &mut dyn Write) -> ChunkResult<()>;

    /// Replace this chunk's contents from its binary form, verifying the
    /// checksum. Corruption surfaces as [`ChunkError::CorruptData`].
    fn unmarshal_from_buf(&mut self, buf: &[u8]) -> ChunkResult<()>;

    fn encoding(&self) -> Encoding;

    /// Approximate fraction of the fixed capacity consumed, in [0, 1].
    fn utilization(&self) -> f64;

    /// A chunk covering at least the closed interval [start, end]. Encodings
    /// for which slicing is not cost-effective may return the unmodified
    /// chunk; over-approximation is documented behavior, not an error.
    fn slice(&self, start: Timestamp, end: Timestamp) -> Box<dyn Chunk>;

    /// Number of samples. May be expensive for some encodings.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate byte size of the encoded data.
    fn size(&self) -> usize;

    /// Called by the owning storage manager when it evicts the chunk; all
    /// subsequent adds fail with [`ChunkError::EvictedChunkWrite`].
    fn mark_evicted(&mut self);

    fn is_evicted(&self) -> bool;
}

/// Create a chunk at the process-wide default encoding.
pub fn create_default() -> Box<dyn Chunk> {
    create(default_encoding())
}

/// Create a chunk at an explicit encoding.
pub fn create(encoding: Encoding) -> Box<dyn Chunk> {
    match encoding {
        Encoding::Delta => Box::new(DeltaChunk::new()),
        Encoding::DoubleDelta => Box::new(DoubleDeltaChunk::new()),
        Encoding::Varbit => Box::new(VarbitChunk::new()),
        Encoding::Bigchunk => Box::new(Bigchunk::new()),
    }
}

/// Create a chunk from a raw tag, as read from a marshalled header or a
/// configuration value. Rejects tags outside {0, 1, 2, 3}.
pub fn create_for_tag(tag: u8) -> ChunkResult<Box<dyn Chunk>> {
    Ok(create(Encoding::try_from(tag)?))
}

/// Grow a full chunk into a chain: create a new chunk at the default
/// encoding, add `sample` to it, and return `[full, new]`. The full chunk is
/// never mutated by this step, and comes back in the error if the new chunk
/// rejects the sample.
pub fn add_to_overflow(full: Box<dyn Chunk>, sample: Sample) -> AddResult {
    match create_default().add(sample) {
        Ok(mut overflow) => {
            let new_chunk = overflow
                .pop()
                .expect("add returns at least one chunk");
            Ok(vec![full, new_chunk])
        }
        Err(err) => Err(AddError::new(full, err.source)),
    }
}

/// Replay every sample of `src` into `dst` (an empty chunk of the target
/// encoding, growing overflow chunks as needed), then append `sample`.
/// Returns the chain that replaces both `src` and the caller's previous
/// head, in order.
///
/// If the source iterator reports an error the transcode aborts with it;
/// there is no partial silent success, and `src` is never mutated. The
/// shared transcode counter is incremented exactly once per invocation,
/// however many overflow chunks result.
pub fn transcode_and_add(
    dst: Box<dyn Chunk>,
    src: &dyn Chunk,
    sample: Sample,
) -> ChunkResult<Vec<Box<dyn Chunk>>> {
    metrics::record_transcode();
    tracing::debug!(
        from = ?src.encoding(),
        to = ?dst.encoding(),
        samples = src.len(),
        "transcoding chunk"
    );

    let mut head = dst;
    let mut body: Vec<Box<dyn Chunk>> = Vec::new();

    let mut it = src.new_iterator();
    while it.scan() {
        let mut chunks = head.add(it.value())?;
        head = chunks.pop().expect("add returns at least one chunk");
        body.append(&mut chunks);
    }
    if let Some(err) = it.err() {
        return Err(err);
    }
    drop(it);

    let mut chunks = head.add(sample)?;
    body.append(&mut chunks);
    Ok(body)
}

/// Parse the `[len: u32][data][crc32: u32]` envelope every encoding wraps
/// its marshalled form in, returning the verified data region.
pub(crate) fn read_envelope(buf: &[u8]) -> ChunkResult<&[u8]> {
    if buf.len() < 8 {
        return Err(ChunkError::CorruptData(
            "chunk envelope truncated".to_string(),
        ));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 8 + len {
        return Err(ChunkError::CorruptData(format!(
            "chunk envelope claims {} bytes, {} available",
            len,
            buf.len() - 8
        )));
    }
    let data = &buf[4..4 + len];
    let stored = u32::from_le_bytes([
        buf[4 + len],
        buf[5 + len],
        buf[6 + len],
        buf[7 + len],
    ]);
    let computed = crc32fast::hash(data);
    if stored != computed {
        return Err(ChunkError::CorruptData(format!(
            "chunk checksum mismatch: stored={}, computed={}",
            stored, computed
        )));
    }
    Ok(data)
}
