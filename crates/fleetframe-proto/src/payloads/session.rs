//! Session-layer payloads: handshake, keepalive, disconnect.

use serde::{Deserialize, Serialize};

/// Client handshake, first frame on every connection.
///
/// Carries the signed credential; the connection is closed immediately if
/// verification fails, so no other payload is ever accepted before this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks
    pub version: u8,
    /// Signed connection credential (JWT)
    pub token: String,
    /// Client software identifier, recorded in the connection context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Server acknowledgement of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Server-assigned connection id
    pub connection_id: u64,
    /// Interval at which the server sends keepalive Pings
    pub heartbeat_secs: u64,
}

/// Graceful disconnect, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnecting
    pub reason: String,
}
