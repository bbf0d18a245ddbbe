//! Protocol error types.
//!
//! Structural errors only: a `ProtocolError` means the bytes on the wire are
//! not a valid frame or payload. Authorization and rate-limit failures are
//! application-level and live in `fleetframe-core`.

use thiserror::Error;

/// Convenience result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames and payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short to contain a complete frame header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes actually available
        actual: usize,
    },

    /// Magic number mismatch (not a fleetframe frame)
    #[error("invalid magic number")]
    InvalidMagic,

    /// Unsupported protocol version
    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the maximum allowed size
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Header claims a different payload size than the buffer provides
    #[error("payload size mismatch: header claims {claimed}, buffer has {actual}")]
    PayloadSizeMismatch {
        /// Size claimed by the header
        claimed: usize,
        /// Size actually present
        actual: usize,
    },

    /// Opcode is not recognized by this protocol version
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
