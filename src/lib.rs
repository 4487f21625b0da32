//! # Chronicle Chunk
//!
//! Chunk encoding layer for the Chronicle time-series storage engine:
//! fixed-capacity compressed containers of time-ordered samples, the
//! overflow and transcoding algorithms that grow and re-encode them, and the
//! iterator contract the query layer reads through.
//!
//! ## Modules
//!
//! - [`chunk`]: the `Chunk`/`ChunkIterator` capability sets, the encoding
//!   registry, overflow and transcoding, and the four concrete encodings
//! - [`encoding`]: encoding tags and the process-wide default encoding
//! - [`types`]: samples and closed query intervals
//! - [`error`]: chunk layer errors
//! - [`metrics`]: operation counters
//!
//! ## Quick Start
//!
//! ```rust
//! use chronicle_chunk::{create, range_values, Encoding, Interval, Sample};
//!
//! fn main() -> Result<(), chronicle_chunk::ChunkError> {
//!     // Build a chunk and append a few samples. Add returns the chunk's
//!     // new canonical representation: keep the chain, drop the old handle.
//!     let mut chain = create(Encoding::DoubleDelta).add(Sample::new(1000, 0.5))?;
//!     for i in 2i64..100 {
//!         let head = chain.pop().expect("chain is never empty");
//!         chain.append(&mut head.add(Sample::new(i * 1000, 0.5 + i as f64))?);
//!     }
//!
//!     // Read a time window back out.
//!     let mut it = chain[0].new_iterator();
//!     let (samples, err) = range_values(&mut *it, Interval::new(10_000, 20_000));
//!     assert!(err.is_none());
//!     assert_eq!(samples.len(), 11);
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod encoding;
pub mod error;
pub mod metrics;
pub mod types;

// Re-export top-level types for convenience
pub use chunk::{
    add_to_overflow, create, create_default, create_for_tag, range_values, transcode_and_add,
    AddError, AddResult, Batch, Bigchunk, Chunk, ChunkIterator, DeltaChunk, DoubleDeltaChunk,
    IndexAccessor, IndexIterator, VarbitChunk, BATCH_SIZE, CHUNK_LEN,
};

pub use encoding::{
    default_encoding, set_default_encoding, set_default_encoding_from_str, Encoding,
};

pub use error::{ChunkError, ChunkResult};

pub use types::{Interval, Sample, Timestamp, ZERO_SAMPLE};

pub use metrics::transcode_ops;
