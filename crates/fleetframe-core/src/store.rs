//! Delivery store abstraction.
//!
//! The persistent datastore is an external collaborator; the core only needs
//! the three operations below. The trait is synchronous - in a threaded
//! runtime these are plain calls, in a cooperative runtime the implementation
//! is the suspension point. Either way the contract is the same: no registry
//! mutation happens before an ownership lookup resolves.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use fleetframe_proto::DeliveryStatus;
use thiserror::Error;

/// Ownership and status of a delivery, as persisted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOwnership {
    /// Customer who requested the delivery
    pub customer_id: u64,
    /// Driver assigned to the delivery, if any
    pub driver_id: Option<u64>,
    /// Current lifecycle status
    pub status: DeliveryStatus,
}

/// Errors from the delivery store collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or failing
    #[error("delivery store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence operations the core requires from the platform datastore.
///
/// Must be `Clone` (shared across connection tasks) and `Send + Sync`.
/// Implementations typically share internal state via `Arc`.
pub trait DeliveryStore: Clone + Send + Sync + 'static {
    /// Look up who owns a delivery and what state it is in.
    ///
    /// Returns `Ok(None)` for an unknown delivery id.
    fn delivery_ownership(&self, delivery_id: u64) -> Result<Option<DeliveryOwnership>, StoreError>;

    /// Persist a driver's latest position.
    ///
    /// A failed write is tolerable - live tracking continues in memory - but
    /// the failure must be surfaced to the caller for logging.
    fn set_driver_location(
        &self,
        driver_id: u64,
        lat: f64,
        lng: f64,
        timestamp_ms: u64,
    ) -> Result<(), StoreError>;

    /// Mark a driver offline with a last-seen timestamp.
    fn set_driver_offline(&self, driver_id: u64, last_seen_ms: u64) -> Result<(), StoreError>;
}

/// A recorded `set_driver_location` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationWrite {
    /// Driver the write was for
    pub driver_id: u64,
    /// Latitude written
    pub lat: f64,
    /// Longitude written
    pub lng: f64,
    /// Timestamp written
    pub timestamp_ms: u64,
}

/// In-memory delivery store for tests, simulation, and the dev server.
///
/// Records every persistence call so tests can assert exactly-once behavior,
/// and can be switched into a failing mode to exercise upstream-failure
/// handling. Thread-safe through a mutex; `lock().expect()` panics only on
/// poisoning, acceptable for test/simulation code.
#[derive(Clone, Default)]
pub struct MemoryDeliveryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    deliveries: HashMap<u64, DeliveryOwnership>,
    location_writes: Vec<LocationWrite>,
    offline_writes: Vec<(u64, u64)>,
    fail_writes: bool,
    fail_lookups: bool,
}

impl MemoryDeliveryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a delivery record.
    #[allow(clippy::expect_used)]
    pub fn insert_delivery(&self, delivery_id: u64, ownership: DeliveryOwnership) {
        self.inner.lock().expect("mutex poisoned").deliveries.insert(delivery_id, ownership);
    }

    /// Make subsequent writes fail with `StoreError::Unavailable`.
    #[allow(clippy::expect_used)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().expect("mutex poisoned").fail_writes = fail;
    }

    /// Make subsequent ownership lookups fail.
    #[allow(clippy::expect_used)]
    pub fn set_fail_lookups(&self, fail: bool) {
        self.inner.lock().expect("mutex poisoned").fail_lookups = fail;
    }

    /// All recorded location writes, in order.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn location_writes(&self) -> Vec<LocationWrite> {
        self.inner.lock().expect("mutex poisoned").location_writes.clone()
    }

    /// All recorded offline writes as `(driver_id, last_seen_ms)`, in order.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn offline_writes(&self) -> Vec<(u64, u64)> {
        self.inner.lock().expect("mutex poisoned").offline_writes.clone()
    }
}

impl DeliveryStore for MemoryDeliveryStore {
    #[allow(clippy::expect_used)]
    fn delivery_ownership(
        &self,
        delivery_id: u64,
    ) -> Result<Option<DeliveryOwnership>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        if inner.fail_lookups {
            return Err(StoreError::Unavailable("lookup failure injected".to_string()));
        }
        Ok(inner.deliveries.get(&delivery_id).copied())
    }

    #[allow(clippy::expect_used)]
    fn set_driver_location(
        &self,
        driver_id: u64,
        lat: f64,
        lng: f64,
        timestamp_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if inner.fail_writes {
            return Err(StoreError::Unavailable("write failure injected".to_string()));
        }
        inner.location_writes.push(LocationWrite { driver_id, lat, lng, timestamp_ms });
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn set_driver_offline(&self, driver_id: u64, last_seen_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if inner.fail_writes {
            return Err(StoreError::Unavailable("write failure injected".to_string()));
        }
        inner.offline_writes.push((driver_id, last_seen_ms));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDeliveryStore {
    #[allow(clippy::expect_used)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("mutex poisoned");
        f.debug_struct("MemoryDeliveryStore")
            .field("deliveries", &inner.deliveries.len())
            .field("location_writes", &inner.location_writes.len())
            .field("offline_writes", &inner.offline_writes.len())
            .finish()
    }
}
