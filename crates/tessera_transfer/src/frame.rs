//! The packed wire frame.
//!
//! Layout (little-endian, packed, all axes normalized to 3):
//!
//! ```text
//! offset      3 x u64   box origin        (unused axes = 0)
//! range       3 x u64   box extents       (unused axes = 1)
//! global_size 3 x u64
//! bid         u64
//! rid         u64       0 = absent
//! push_cid    u64
//! payload     bytes     row-major at the sender's element size
//! ```

use tessera_core::{BufferId, CommandId, ReductionId};
use tessera_grid::Subrange;

/// Fixed byte length of the frame header
pub const FRAME_HEADER_LEN: usize = 12 * 8;

/// Frame decoding error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a frame header
    Truncated {
        /// Bytes actually received
        len: usize,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "Frame truncated: {} bytes, header needs {}", len, FRAME_HEADER_LEN)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// One buffer transfer on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// The transferred box within the buffer
    pub sr: Subrange,
    /// Buffer the payload belongs to
    pub bid: BufferId,
    /// Reduction routing, if the payload is a partial result
    pub rid: Option<ReductionId>,
    /// Command id of the push that produced this frame
    pub push_cid: CommandId,
    /// Row-major payload bytes
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Total encoded size in bytes
    #[must_use]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Encode to wire bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len());
        for d in 0..3 {
            out.extend_from_slice(&self.sr.offset[d].to_le_bytes());
        }
        for d in 0..3 {
            out.extend_from_slice(&self.sr.range[d].to_le_bytes());
        }
        for d in 0..3 {
            out.extend_from_slice(&self.sr.global_size[d].to_le_bytes());
        }
        out.extend_from_slice(&self.bid.as_u64().to_le_bytes());
        out.extend_from_slice(&self.rid.map_or(0, |r| r.as_u64()).to_le_bytes());
        out.extend_from_slice(&self.push_cid.as_u64().to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is shorter than the frame header.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated { len: bytes.len() });
        }

        let mut words = [0u64; 12];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(buf);
        }

        Ok(Self {
            sr: Subrange::new(
                [words[0], words[1], words[2]],
                [words[3], words[4], words[5]],
                [words[6], words[7], words[8]],
            ),
            bid: BufferId::from_raw(words[9]),
            rid: ReductionId::from_raw(words[10]),
            push_cid: CommandId::from_raw(words[11]),
            payload: bytes[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame() -> DataFrame {
        DataFrame {
            sr: Subrange::d1(4, 4, 8),
            bid: BufferId::from_raw(2),
            rid: None,
            push_cid: CommandId::from_raw(42),
            payload: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn test_roundtrip() {
        let frame = make_test_frame();
        let decoded = DataFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_roundtrip_with_reduction() {
        let mut frame = make_test_frame();
        frame.rid = ReductionId::from_raw(7);
        let decoded = DataFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.rid, ReductionId::from_raw(7));
    }

    #[test]
    fn test_layout_offsets() {
        let frame = make_test_frame();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 4);

        // offset[0] = 4 at byte 0
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 4);
        // range = [4, 1, 1] starting at byte 24
        assert_eq!(u64::from_le_bytes(bytes[24..32].try_into().unwrap()), 4);
        assert_eq!(u64::from_le_bytes(bytes[32..40].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(bytes[40..48].try_into().unwrap()), 1);
        // bid at byte 72
        assert_eq!(u64::from_le_bytes(bytes[72..80].try_into().unwrap()), 2);
        // rid absent encodes as 0 at byte 80
        assert_eq!(u64::from_le_bytes(bytes[80..88].try_into().unwrap()), 0);
        // push_cid at byte 88
        assert_eq!(u64::from_le_bytes(bytes[88..96].try_into().unwrap()), 42);
        // payload follows the header
        assert_eq!(&bytes[FRAME_HEADER_LEN..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_truncated() {
        let result = DataFrame::decode(&[0u8; 10]);
        assert_eq!(result, Err(FrameError::Truncated { len: 10 }));
    }

    #[test]
    fn test_empty_payload() {
        let mut frame = make_test_frame();
        frame.payload.clear();
        let decoded = DataFrame::decode(&frame.encode()).unwrap();
        assert!(decoded.payload.is_empty());
    }
}
