//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 32-byte structure serialized as raw binary
//! (Big Endian). Keeping the sender and delivery identifiers in the header
//! lets the server route and log a frame without touching the CBOR payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 32-byte frame header (Big Endian network byte order).
///
/// All multi-byte integers are stored in Big Endian format to match network
/// byte order. Fields are stored as raw byte arrays to avoid alignment issues.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits ensures this struct
/// can be safely cast from untrusted network bytes - every 32-byte pattern is
/// a structurally valid header, so parsing cannot cause undefined behavior.
/// The `sender_id` field is advisory until the connection authenticates; the
/// dispatch core always trusts the authenticated connection context over
/// header claims.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],             // 0x464C4652 ("FLFR" in ASCII)
    version: u8,                // 0x01
    flags: u8,                  // reserved, must be zero
    pub(crate) opcode: [u8; 2], // u16 operation code

    // Payload metadata (4 bytes: 8-11)
    pub(crate) payload_size: [u8; 4], // u32 payload length

    // Routing context (16 bytes: 12-27)
    sender_id: [u8; 8],   // u64 authenticated user id (0 pre-handshake)
    delivery_id: [u8; 8], // u64 delivery id (0 when not delivery-scoped)

    // Reserved for future use (4 bytes: 28-31)
    reserved: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (32 bytes).
    pub const SIZE: usize = 32;

    /// Magic number: "FLFR" in ASCII (0x464C4652).
    pub const MAGIC: u32 = 0x464C_4652;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB).
    ///
    /// Tracking events are tiny; anything near this limit is a broken or
    /// hostile peer.
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Create a new header with the specified opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            payload_size: [0u8; 4],
            sender_id: [0u8; 8],
            delivery_id: [0u8; 8],
            reserved: [0u8; 4],
        }
    }

    /// Parse a header from network bytes (zero-copy, safe).
    ///
    /// Validation order: length, magic, version, payload size - cheapest
    /// checks first so garbage fails fast.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the buffer is under 32 bytes
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` on a version mismatch
    /// - `ProtocolError::PayloadTooLarge` if the claimed size exceeds the max
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic number (0x464C4652 = "FLFR").
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Payload size in bytes (max 64 KiB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Authenticated user id of the sender. Zero before the handshake.
    #[must_use]
    pub fn sender_id(&self) -> u64 {
        u64::from_be_bytes(self.sender_id)
    }

    /// Delivery this frame is scoped to. Zero when not delivery-scoped.
    #[must_use]
    pub fn delivery_id(&self) -> u64 {
        u64::from_be_bytes(self.delivery_id)
    }

    /// Update the sender identifier.
    pub fn set_sender_id(&mut self, sender_id: u64) {
        self.sender_id = sender_id.to_be_bytes();
    }

    /// Update the delivery identifier.
    pub fn set_delivery_id(&mut self, delivery_id: u64) {
        self.delivery_id = delivery_id.to_be_bytes();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("opcode", &format_args!("{:#06x}", self.opcode()))
            .field("payload_size", &self.payload_size())
            .field("sender_id", &self.sender_id())
            .field("delivery_id", &self.delivery_id())
            .finish()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
