//! Chunk layer error types
//!
//! Defines all errors that can occur in the chunk encoding layer.
//! Errors are always returned to the caller; nothing here retries or
//! swallows a failure. Policy (quarantining corrupt chunks, rejecting
//! writes to evicted chunks) belongs to the storage manager.

use thiserror::Error;

/// Errors that can occur in the chunk encoding layer
///
/// `Clone` and `PartialEq` are intentional: iterator errors are sticky and
/// surfaced repeatedly through [`err`](crate::chunk::ChunkIterator::err),
/// so the error type must be cheap to hand out more than once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Access attempted outside of a chunk's valid range
    #[error("attempted access outside of chunk boundaries")]
    BoundsExceeded,

    /// Add invoked on a chunk the storage manager has marked evicted
    #[error("attempted to add sample to evicted chunk")]
    EvictedChunkWrite,

    /// Registry asked to build a chunk for an unrecognized tag
    #[error("unknown chunk encoding: {0}")]
    UnknownEncoding(u8),

    /// Decode failure (checksum mismatch, truncated stream, invalid header).
    /// Once surfaced through an iterator this is sticky; the chunk should be
    /// quarantined, not retried.
    #[error("corrupt chunk data: {0}")]
    CorruptData(String),

    /// Textual default-encoding setting not one of the recognized literals
    #[error("invalid chunk encoding: {0}")]
    InvalidConfigValue(String),

    /// I/O failure while marshalling a chunk. Held as a string so the error
    /// type stays `Clone`.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChunkError {
    fn from(err: std::io::Error) -> Self {
        ChunkError::Io(err.to_string())
    }
}

/// Result type alias for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;
