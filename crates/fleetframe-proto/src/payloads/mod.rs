//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary for performance, but payloads use CBOR for
//! type safety and forward compatibility. The `Payload` enum covers all
//! message types: session management (Hello, Ping, etc.), tracking events,
//! and fare estimation.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). The variant discriminator is NOT serialized - the frame
//! header's opcode already identifies the payload type, which prevents a
//! peer from sending mismatched opcode/payload pairs.

pub mod fare;
pub mod session;
pub mod tracking;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads.
///
/// The payload type is determined by the `Opcode` in the frame header, so
/// only the inner struct content is serialized (no variant tag in CBOR).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    // Session management
    /// Handshake carrying the signed credential
    Hello(session::Hello),
    /// Server response to Hello
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Keepalive probe
    Ping,
    /// Keepalive response
    Pong,

    // Tracking
    /// Driver position sample
    LocationUpdate(tracking::LocationUpdate),
    /// Subscribe to a delivery's location stream
    TrackDelivery(tracking::TrackDelivery),
    /// Unsubscribe from a delivery's location stream
    StopTracking(tracking::StopTracking),
    /// Room-scoped driver position broadcast
    DriverLocation(tracking::DriverLocation),
    /// Delivery status snapshot
    StatusUpdate(tracking::StatusUpdate),

    // Fare estimation
    /// Fare estimate request
    FareQuote(fare::FareQuote),
    /// Fare estimate response
    FareEstimate(fare::FareBreakdown),

    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Credential missing, malformed, or expired; the connection closes.
    pub const UNAUTHENTICATED: u16 = 0x0001;
    /// Event dropped by the per-connection rate limiter.
    pub const RATE_LIMITED: u16 = 0x0002;
    /// Payload failed validation (malformed fields, out-of-range values).
    pub const VALIDATION: u16 = 0x0003;
    /// Role or ownership check failed.
    pub const UNAUTHORIZED: u16 = 0x0004;
    /// Referenced delivery does not exist.
    pub const NOT_FOUND: u16 = 0x0005;
    /// Delivery is not in a state that accepts this event (retryable).
    pub const INVALID_STATE: u16 = 0x0006;
    /// Persistence or audit collaborator failed.
    pub const UPSTREAM: u16 = 0x0007;

    /// Create an unauthenticated error.
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHENTICATED, message: msg.into(), retry_after: None }
    }

    /// Create a rate-limited error with a retry hint.
    pub fn rate_limited(msg: impl Into<String>, retry_after_secs: u64) -> Self {
        Self { code: Self::RATE_LIMITED, message: msg.into(), retry_after: Some(retry_after_secs) }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self { code: Self::VALIDATION, message: msg.into(), retry_after: None }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHORIZED, message: msg.into(), retry_after: None }
    }

    /// Create a not-found error for a delivery.
    pub fn not_found(delivery_id: u64) -> Self {
        Self {
            code: Self::NOT_FOUND,
            message: format!("delivery not found: {delivery_id}"),
            retry_after: None,
        }
    }

    /// Create a retryable invalid-state error.
    pub fn invalid_state(msg: impl Into<String>, retry_after_secs: u64) -> Self {
        Self { code: Self::INVALID_STATE, message: msg.into(), retry_after: Some(retry_after_secs) }
    }

    /// Create an upstream-failure error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self { code: Self::UPSTREAM, message: msg.into(), retry_after: None }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::LocationUpdate(_) => Opcode::LocationUpdate,
            Self::TrackDelivery(_) => Opcode::TrackDelivery,
            Self::StopTracking(_) => Opcode::StopTracking,
            Self::DriverLocation(_) => Opcode::DriverLocation,
            Self::StatusUpdate(_) => Opcode::StatusUpdate,
            Self::FareQuote(_) => Opcode::FareQuote,
            Self::FareEstimate(_) => Opcode::FareEstimate,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the payload into a buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag; the frame
    /// header's opcode already identifies the payload type.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Ping | Self::Pong => Ok(()), // Zero-byte payloads
            Self::LocationUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::TrackDelivery(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::StopTracking(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DriverLocation(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::StatusUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FareQuote(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FareEstimate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload from bytes based on the opcode.
    ///
    /// The size check happens BEFORE CBOR parsing begins so the parser never
    /// processes maliciously large inputs.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the 64 KiB limit
    /// - `ProtocolError::CborDecode` if deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn read<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(read(bytes)?),
            Opcode::HelloReply => Self::HelloReply(read(bytes)?),
            Opcode::Goodbye => Self::Goodbye(read(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::LocationUpdate => Self::LocationUpdate(read(bytes)?),
            Opcode::TrackDelivery => Self::TrackDelivery(read(bytes)?),
            Opcode::StopTracking => Self::StopTracking(read(bytes)?),
            Opcode::DriverLocation => Self::DriverLocation(read(bytes)?),
            Opcode::StatusUpdate => Self::StatusUpdate(read(bytes)?),
            Opcode::FareQuote => Self::FareQuote(read(bytes)?),
            Opcode::FareEstimate => Self::FareEstimate(read(bytes)?),
            Opcode::Error => Self::Error(read(bytes)?),
        };

        Ok(payload)
    }

    /// Convert the payload into a transport frame.
    ///
    /// Encodes the payload to CBOR, sets the correct opcode in the header,
    /// and creates a `Frame` with automatic `payload_size` calculation.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse a payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - `ProtocolError::CborDecode` if deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the limit
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
