//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 32-byte raw binary header
//! followed by the CBOR-encoded payload bytes. This is a pure data holder;
//! for high-level logic see `Payload::into_frame()` and
//! `Payload::from_frame()`.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer).
///
/// Layout on the wire:
/// `[FrameHeader: 32 bytes, raw binary] + [payload: variable bytes]`
///
/// Holds raw payload bytes, NOT the `Payload` enum - the server can route a
/// frame to a room without deserializing it.
///
/// # Invariants
///
/// - `payload.len()` MUST match `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` MUST NOT exceed [`FrameHeader::MAX_PAYLOAD_SIZE`].
///   Violations are rejected during decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (32 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with automatic `payload_size` calculation.
    ///
    /// The header's size field is always set to match the actual payload
    /// length, so a mismatched frame cannot be constructed.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // INVARIANT: payload length fits in u32 - Bytes is bounded by
        // isize::MAX and the protocol limit is 64 KiB.
        header.payload_size = (payload.len() as u32).to_be_bytes();

        Self { header, payload }
    }

    /// Encode the frame into a buffer.
    ///
    /// Writes `[header (32 bytes)] + [payload (variable)]`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the 64 KiB
    ///   limit
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode a frame from a complete buffer.
    ///
    /// The buffer must contain exactly one frame: header plus the payload
    /// the header claims. Trailing bytes are rejected so framing bugs
    /// surface immediately instead of silently desynchronizing the stream.
    ///
    /// # Errors
    ///
    /// - Any header validation error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::PayloadSizeMismatch` if the buffer length does not
    ///   match the header's claim
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;
        let claimed = header.payload_size() as usize;
        let actual = bytes.len() - FrameHeader::SIZE;

        if claimed != actual {
            return Err(ProtocolError::PayloadSizeMismatch { claimed, actual });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..]);
        Ok(Self { header, payload })
    }

    /// Total encoded size of this frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }
}
