//! Chunk encoding tags and the process-wide default encoding
//!
//! Each chunk carries a 1-byte encoding tag selecting its concrete
//! implementation. The default encoding is mutable runtime configuration:
//! changing it affects only chunks created afterward.

use crate::error::{ChunkError, ChunkResult};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Which encoding a chunk uses: delta, double-delta, varbit, or bigchunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    /// Fixed-width delta-from-base records
    Delta = 0,
    /// Fixed-width deviation-from-linear-prediction records
    DoubleDelta = 1,
    /// Gorilla-style bit-packed stream
    Varbit = 2,
    /// Variable-length in-memory chunk, compressed on marshal
    Bigchunk = 3,
}

impl TryFrom<u8> for Encoding {
    type Error = ChunkError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Encoding::Delta),
            1 => Ok(Encoding::DoubleDelta),
            2 => Ok(Encoding::Varbit),
            3 => Ok(Encoding::Bigchunk),
            _ => Err(ChunkError::UnknownEncoding(tag)),
        }
    }
}

impl FromStr for Encoding {
    type Err = ChunkError;

    /// Parse the textual flag form. Only the literals "0" through "3" are
    /// accepted; anything else is rejected and the default encoding is left
    /// unchanged by [`set_default_encoding_from_str`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Encoding::Delta),
            "1" => Ok(Encoding::DoubleDelta),
            "2" => Ok(Encoding::Varbit),
            "3" => Ok(Encoding::Bigchunk),
            _ => Err(ChunkError::InvalidConfigValue(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    /// Prints the numeric tag so the flag form round-trips through `FromStr`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Process-wide default encoding, used by [`crate::chunk::create_default`]
/// and by the overflow path. Guarded by an atomic since chunk mutation call
/// sites are independently owned.
static DEFAULT_ENCODING: AtomicU8 = AtomicU8::new(Encoding::DoubleDelta as u8);

/// The current default encoding.
pub fn default_encoding() -> Encoding {
    // The atomic is only ever written through set_default_encoding, so the
    // stored tag is always valid; a failure here is a programming error.
    Encoding::try_from(DEFAULT_ENCODING.load(Ordering::Relaxed))
        .expect("default encoding holds a valid tag")
}

/// Change the default encoding. Affects only chunks created afterward.
pub fn set_default_encoding(encoding: Encoding) {
    DEFAULT_ENCODING.store(encoding as u8, Ordering::Relaxed);
}

/// Set the default encoding from its textual flag form. On an unrecognized
/// literal the default is left unchanged.
pub fn set_default_encoding_from_str(s: &str) -> ChunkResult<()> {
    let encoding: Encoding = s.parse()?;
    set_default_encoding(encoding);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::global_state_lock;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0u8..=3 {
            let encoding = Encoding::try_from(tag).unwrap();
            assert_eq!(encoding as u8, tag);
        }
        assert_eq!(
            Encoding::try_from(99),
            Err(ChunkError::UnknownEncoding(99))
        );
    }

    #[test]
    fn test_from_str() {
        assert_eq!("0".parse::<Encoding>().unwrap(), Encoding::Delta);
        assert_eq!("1".parse::<Encoding>().unwrap(), Encoding::DoubleDelta);
        assert_eq!("2".parse::<Encoding>().unwrap(), Encoding::Varbit);
        assert_eq!("3".parse::<Encoding>().unwrap(), Encoding::Bigchunk);

        let err = "gorilla".parse::<Encoding>().unwrap_err();
        assert_eq!(err.to_string(), "invalid chunk encoding: gorilla");
    }

    #[test]
    fn test_display_round_trips() {
        for encoding in [
            Encoding::Delta,
            Encoding::DoubleDelta,
            Encoding::Varbit,
            Encoding::Bigchunk,
        ] {
            assert_eq!(encoding.to_string().parse::<Encoding>().unwrap(), encoding);
        }
    }

    #[test]
    fn test_set_default_from_str() {
        let _guard = global_state_lock();
        let original = default_encoding();

        set_default_encoding_from_str("2").unwrap();
        assert_eq!(default_encoding(), Encoding::Varbit);

        // A bad literal must leave the default untouched.
        assert!(set_default_encoding_from_str("17").is_err());
        assert_eq!(default_encoding(), Encoding::Varbit);

        set_default_encoding(original);
    }
}
