//! Server runtime error types.

use thiserror::Error;

/// Errors from the production server runtime.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration (bind address, TLS material, secrets)
    #[error("config error: {0}")]
    Config(String),

    /// Transport-level failure (bind, accept, stream I/O)
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Internal runtime failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<fleetframe_proto::ProtocolError> for ServerError {
    fn from(err: fleetframe_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
