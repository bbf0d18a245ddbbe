//! Event-handling error taxonomy.
//!
//! Every failure an inbound event can hit maps onto one of these variants,
//! because callers react differently: only `Unauthenticated` terminates the
//! connection, only `Unauthorized` produces a security event, and an
//! `Upstream` failure on a location write still lets the in-memory update
//! proceed. Nothing here is fatal to the process.

use std::time::Duration;

use fleetframe_proto::{DeliveryStatus, ErrorPayload};
use thiserror::Error;

use crate::{guard::Deny, rate_limit::EventKind};

/// Why an inbound event was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Credential missing, malformed, or expired; closes the connection
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Dropped by the rate limiter; sender alone is notified
    #[error("rate limited: {kind} window has {retry_after:?} remaining", kind = .kind.as_str())]
    RateLimited {
        /// Event kind that was limited
        kind: EventKind,
        /// Time until the window expires
        retry_after: Duration,
    },

    /// Malformed payload
    #[error("validation failed: {0}")]
    Validation(String),

    /// Role or ownership violation; recorded as a security event
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced delivery does not exist
    #[error("delivery not found: {delivery_id}")]
    NotFound {
        /// Delivery that was referenced
        delivery_id: u64,
    },

    /// Delivery is not in a state that accepts the event (retryable)
    #[error("delivery {delivery_id} is {status}, not active")]
    InvalidState {
        /// Delivery that was referenced
        delivery_id: u64,
        /// Its current status
        status: DeliveryStatus,
    },

    /// Persistence or audit collaborator failure
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl EventError {
    /// Whether this error terminates the connection.
    ///
    /// Only authentication failures do; everything else is reported to the
    /// sender and the session continues.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }

    /// Wire representation of this error.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Unauthenticated(msg) => ErrorPayload::unauthenticated(msg.clone()),
            Self::RateLimited { kind, retry_after } => ErrorPayload::rate_limited(
                format!("too many {} events", kind.as_str()),
                retry_after.as_secs().max(1),
            ),
            Self::Validation(msg) => ErrorPayload::validation(msg.clone()),
            Self::Unauthorized(msg) => ErrorPayload::unauthorized(msg.clone()),
            Self::NotFound { delivery_id } => ErrorPayload::not_found(*delivery_id),
            Self::InvalidState { delivery_id, status } => ErrorPayload::invalid_state(
                format!("delivery {delivery_id} is {status}, not active"),
                30,
            ),
            Self::Upstream(msg) => ErrorPayload::upstream(msg.clone()),
        }
    }
}

impl From<Deny> for EventError {
    fn from(deny: Deny) -> Self {
        match deny {
            Deny::Malformed(msg) => Self::Validation(msg),
            Deny::NotFound { delivery_id } => Self::NotFound { delivery_id },
            Deny::Unauthorized { reason } => Self::Unauthorized(reason),
            Deny::InactiveDelivery { delivery_id, status } => {
                Self::InvalidState { delivery_id, status }
            },
        }
    }
}
