//! Fleetframe wire protocol.
//!
//! Defines the transport-level framing shared by the dispatch core and the
//! production server: a fixed 32-byte binary header for O(1) routing, CBOR
//! payloads for type safety and forward compatibility, and the wire enums
//! (`Role`, `DeliveryStatus`) that both ends of a connection must agree on.
//!
//! Frame headers are raw binary (Big Endian) so the server can route a frame
//! to the right delivery room without deserializing the payload; payloads use
//! CBOR because it is self-describing, compact, and needs no code generation.

mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;
mod wire;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};
pub use wire::{DeliveryStatus, Role};

/// ALPN protocol identifier negotiated during the TLS handshake.
pub const ALPN_PROTOCOL: &[u8] = b"fleetframe";
