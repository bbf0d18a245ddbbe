//! Tracking payloads: location publishing and delivery subscriptions.

use serde::{Deserialize, Serialize};

use crate::wire::DeliveryStatus;

/// Driver-published position sample.
///
/// Coordinates are validated by the authorization guard, not here - decoding
/// succeeds for any finite-or-not float so the guard can report a proper
/// validation error instead of a bare protocol failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// Latitude in degrees, must be within [-90, 90]
    pub lat: f64,
    /// Longitude in degrees, must be within [-180, 180]
    pub lng: f64,
    /// Compass heading in degrees
    pub heading: f64,
    /// Delivery this sample belongs to, if the driver is on a job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<u64>,
}

/// Subscribe to a delivery's live location stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDelivery {
    /// Delivery to track
    pub delivery_id: u64,
}

/// Unsubscribe from a delivery's live location stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTracking {
    /// Delivery to stop tracking
    pub delivery_id: u64,
}

/// Room-scoped broadcast of a driver's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    /// Driver the sample belongs to
    pub driver_id: u64,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
    /// Compass heading in degrees
    pub heading: f64,
    /// Server wall-clock time the sample was accepted, Unix milliseconds
    pub timestamp_ms: u64,
}

/// Delivery status snapshot, sent directly to a new subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Delivery the status belongs to
    pub delivery_id: u64,
    /// Current lifecycle status
    pub status: DeliveryStatus,
    /// Server wall-clock time of the snapshot, Unix milliseconds
    pub timestamp_ms: u64,
}
