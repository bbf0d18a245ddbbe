//! Wire enums shared between client and server.
//!
//! These appear inside CBOR payloads and inside the signed connection
//! credential, so both ends must agree on their serialized form. Serde
//! renames keep the wire strings lowercase and stable even if variant
//! names change.

use serde::{Deserialize, Serialize};

/// Role encoded in the connection credential.
///
/// Exactly four roles exist; a credential carrying anything else fails
/// deserialization and the connection is refused before any session state
/// is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End customer requesting and tracking deliveries
    Customer,
    /// Business account with bulk deliveries
    Enterprise,
    /// Courier publishing live location
    Driver,
    /// Platform operator with unrestricted tracking access
    Admin,
}

impl Role {
    /// Whether this role may publish driver location samples.
    #[must_use]
    pub const fn is_driver(self) -> bool {
        matches!(self, Self::Driver)
    }

    /// Whether this role bypasses delivery ownership checks.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Customer => "customer",
            Self::Enterprise => "enterprise",
            Self::Driver => "driver",
            Self::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a delivery, as reported by the delivery store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, no driver assigned yet
    Pending,
    /// Driver accepted the job
    Accepted,
    /// Package collected from sender
    PickedUp,
    /// En route to the recipient
    InTransit,
    /// Completed
    Delivered,
    /// Aborted by either party
    Cancelled,
}

impl DeliveryStatus {
    /// Whether location updates may be attached to a delivery in this state.
    ///
    /// Only deliveries a driver is actively working carry a live stream;
    /// updates against any other state are refused as retryable.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Accepted | Self::PickedUp | Self::InTransit)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
