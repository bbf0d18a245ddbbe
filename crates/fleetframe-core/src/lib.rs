//! Fleetframe dispatch core.
//!
//! Sans-IO implementation of the real-time tracking and dispatch-authorization
//! subsystem: connection authentication, per-event rate limiting, ownership
//! checks, the in-memory driver/room registries, and the fare engine. All
//! methods return actions for a runtime to execute; the only blocking points
//! are the injected collaborator traits ([`store::DeliveryStore`],
//! [`audit::AuditLog`]).
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (per-process, &self)
//!   ├─ TokenAuthenticator     credential -> ConnectionContext
//!   ├─ RateLimiter            fixed windows per (connection, event kind)
//!   ├─ DriverRegistry         driver id -> presence, user id -> connection
//!   ├─ RoomRouter             delivery id -> subscribed connections
//!   ├─ DeliveryStore (S)      ownership lookups, persistence writes
//!   └─ AuditLog (A)           security + lifecycle events
//! Connection (per-transport-connection, &mut, owned by its task)
//!   └─ lifecycle state machine: Connecting -> Authenticated -> Active -> Closed
//! ```
//!
//! # Concurrency
//!
//! A single connection's events are processed strictly in order because its
//! `Connection` is owned by one transport task; different connections proceed
//! in parallel against the shared services, which synchronize per key via
//! sharded maps. There is no global lock.

pub mod audit;
pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod fare;
pub mod guard;
pub mod rate_limit;
pub mod registry;
pub mod rooms;
pub mod store;

pub use audit::{
    AuditLog, AuditRecord, LifecycleAction, RecordingAudit, SecurityEventKind, Severity,
};
pub use auth::{AuthError, Claims, ConnectionContext, TokenAuthenticator};
pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, ConnectionPhase,
};
pub use dispatch::{Action, CoreConfig, Dispatcher, LogLevel};
pub use env::Environment;
pub use error::EventError;
pub use fare::{VehicleType, compute_fare};
pub use guard::{Deny, authorize_location_update, authorize_track};
pub use rate_limit::{EventKind, EventLimit, RateDecision, RateLimitTable, RateLimiter};
pub use registry::{ConnectionBinding, DriverPresence, DriverRegistry};
pub use rooms::RoomRouter;
pub use store::{DeliveryOwnership, DeliveryStore, LocationWrite, MemoryDeliveryStore, StoreError};
