//! Wire format of simulated segments.
//!
//! Simulated payloads carry a small header instead of real media so the
//! simulated sink knows what time span a segment covers and how many bytes
//! of quota it stands for:
//!
//! ```text
//! media: b"SLSM" | start f64 | duration f64 | declared_size u64
//! init:  b"SLSI" | quality u32 | declared_size u64
//! ```
//!
//! All numbers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sluice_core::buffer::{Quality, TimeRange};
use thiserror::Error;

const MEDIA_MAGIC: &[u8; 4] = b"SLSM";
const INIT_MAGIC: &[u8; 4] = b"SLSI";
const MEDIA_HEADER_LEN: usize = 4 + 8 + 8 + 8;
const INIT_HEADER_LEN: usize = 4 + 4 + 8;

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentHeader {
    Media {
        start: f64,
        duration: f64,
        declared_size: u64,
    },
    Init {
        quality: Quality,
        declared_size: u64,
    },
}

impl SegmentHeader {
    /// Bytes of sink quota the segment occupies.
    pub fn declared_size(&self) -> u64 {
        match self {
            SegmentHeader::Media { declared_size, .. }
            | SegmentHeader::Init { declared_size, .. } => *declared_size,
        }
    }

    /// Presentation span of a media segment, before any offset.
    pub fn span(&self) -> Option<TimeRange> {
        match self {
            SegmentHeader::Media {
                start, duration, ..
            } => Some(TimeRange::new(*start, start + duration)),
            SegmentHeader::Init { .. } => None,
        }
    }
}

/// Errors raised while decoding a simulated segment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("Segment truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("Unknown segment magic: {magic:?}")]
    UnknownMagic { magic: [u8; 4] },

    #[error("Invalid media timing: start {start}, duration {duration}")]
    InvalidTiming { start: f64, duration: f64 },
}

/// Encodes a media segment header.
pub fn encode_media(start: f64, duration: f64, declared_size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(MEDIA_HEADER_LEN);
    buf.put_slice(MEDIA_MAGIC);
    buf.put_f64(start);
    buf.put_f64(duration);
    buf.put_u64(declared_size);
    buf.freeze()
}

/// Encodes an initialization segment header.
pub fn encode_init(quality: Quality, declared_size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(INIT_HEADER_LEN);
    buf.put_slice(INIT_MAGIC);
    buf.put_u32(quality.level());
    buf.put_u64(declared_size);
    buf.freeze()
}

/// Decodes a segment header.
///
/// # Errors
/// - `CodecError::Truncated` - Fewer bytes than the header needs
/// - `CodecError::UnknownMagic` - Not a simulated segment
/// - `CodecError::InvalidTiming` - Non-finite start or non-positive duration
pub fn decode(bytes: &Bytes) -> Result<SegmentHeader, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated { len: bytes.len() });
    }
    let mut buf = bytes.clone();
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);

    match &magic {
        MEDIA_MAGIC => {
            if bytes.len() < MEDIA_HEADER_LEN {
                return Err(CodecError::Truncated { len: bytes.len() });
            }
            let start = buf.get_f64();
            let duration = buf.get_f64();
            let declared_size = buf.get_u64();
            if !start.is_finite() || !duration.is_finite() || duration <= 0.0 {
                return Err(CodecError::InvalidTiming { start, duration });
            }
            Ok(SegmentHeader::Media {
                start,
                duration,
                declared_size,
            })
        }
        INIT_MAGIC => {
            if bytes.len() < INIT_HEADER_LEN {
                return Err(CodecError::Truncated { len: bytes.len() });
            }
            let quality = Quality::new(buf.get_u32());
            let declared_size = buf.get_u64();
            Ok(SegmentHeader::Init {
                quality,
                declared_size,
            })
        }
        _ => Err(CodecError::UnknownMagic { magic }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_header_layout() {
        let bytes = encode_media(4.0, 2.0, 65_536);
        assert_eq!(bytes.len(), MEDIA_HEADER_LEN);
        assert_eq!(&bytes[..4], b"SLSM");

        let header = decode(&bytes).unwrap();
        assert_eq!(header.span(), Some(TimeRange::new(4.0, 6.0)));
        assert_eq!(header.declared_size(), 65_536);
    }

    #[test]
    fn test_init_header_has_no_span() {
        let header = decode(&encode_init(Quality::new(3), 900)).unwrap();
        assert_eq!(
            header,
            SegmentHeader::Init {
                quality: Quality::new(3),
                declared_size: 900
            }
        );
        assert_eq!(header.span(), None);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(
            decode(&Bytes::from_static(b"SL")),
            Err(CodecError::Truncated { len: 2 })
        );
        assert_eq!(
            decode(&Bytes::from_static(b"SLSM\0\0")),
            Err(CodecError::Truncated { len: 6 })
        );
        assert!(matches!(
            decode(&Bytes::from_static(b"RIFF....")),
            Err(CodecError::UnknownMagic { .. })
        ));
        assert!(matches!(
            decode(&encode_media(0.0, 0.0, 10)),
            Err(CodecError::InvalidTiming { .. })
        ));
    }
}
