//! Active registry: online drivers and connection bindings.
//!
//! Process-wide, mutated only through this API. Backed by sharded concurrent
//! maps so updates to different drivers proceed independently while updates
//! to the same driver serialize on its shard - no global lock.
//!
//! # Invariants
//!
//! - At most one live presence per driver id. `upsert_driver` is
//!   last-writer-wins: a second concurrent login supersedes the first, never
//!   merges with it.
//! - Removal is guarded by connection id: a stale disconnect (from a
//!   superseded connection) cannot evict the presence or binding owned by a
//!   newer connection.

use dashmap::DashMap;
use fleetframe_proto::Role;

/// Live location/metadata record for an online driver.
///
/// Created on the driver's first accepted location update, overwritten on
/// each subsequent one, removed on disconnect or explicit offline
/// transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPresence {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
    /// Compass heading in degrees
    pub heading: f64,
    /// Delivery the driver is currently working, if any
    pub delivery_id: Option<u64>,
    /// Connection that produced this record
    pub connection_id: u64,
    /// Wall-clock time of the last update, Unix milliseconds
    pub updated_at_ms: u64,
    /// Account verification flag from the credential
    pub verified: bool,
}

/// Connection handle bound to a user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionBinding {
    /// Connection currently serving this user
    pub connection_id: u64,
    /// Role the connection authenticated with
    pub role: Role,
    /// Wall-clock bind time, Unix milliseconds
    pub bound_at_ms: u64,
}

/// Registry of online drivers and user-to-connection bindings.
///
/// All operations are idempotent and O(1).
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: DashMap<u64, DriverPresence>,
    bindings: DashMap<u64, ConnectionBinding>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a driver's presence. Last writer wins.
    pub fn upsert_driver(&self, driver_id: u64, presence: DriverPresence) {
        self.drivers.insert(driver_id, presence);
    }

    /// Remove a driver's presence only if it is owned by `connection_id`.
    ///
    /// Returns whether a presence was removed. A stale disconnect whose
    /// presence has been superseded by a newer connection removes nothing.
    pub fn remove_driver_if(&self, driver_id: u64, connection_id: u64) -> bool {
        self.drivers.remove_if(&driver_id, |_, p| p.connection_id == connection_id).is_some()
    }

    /// Current presence for a driver, if online.
    #[must_use]
    pub fn driver(&self, driver_id: u64) -> Option<DriverPresence> {
        self.drivers.get(&driver_id).map(|p| *p)
    }

    /// Number of drivers with a live presence.
    #[must_use]
    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Bind a user id to its connection. A newer login supersedes the old
    /// binding.
    pub fn bind_connection(&self, user_id: u64, binding: ConnectionBinding) {
        self.bindings.insert(user_id, binding);
    }

    /// Remove a user's binding only if it is owned by `connection_id`.
    ///
    /// Returns whether the binding was removed, i.e. whether this connection
    /// was still the user's live connection.
    pub fn unbind_connection_if(&self, user_id: u64, connection_id: u64) -> bool {
        self.bindings.remove_if(&user_id, |_, b| b.connection_id == connection_id).is_some()
    }

    /// Current binding for a user, if connected.
    #[must_use]
    pub fn binding(&self, user_id: u64) -> Option<ConnectionBinding> {
        self.bindings.get(&user_id).map(|b| *b)
    }

    /// Number of bound connections.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
