//! Dispatcher: event dispatch and connection lifecycle management.
//!
//! The `Dispatcher` ties the core together: it authenticates handshakes,
//! gates every inbound event through the rate limiter and authorization
//! guard, mutates the registries, and returns actions for the runtime to
//! execute. It performs no I/O itself beyond the injected collaborator
//! traits.
//!
//! # Event Flow
//!
//! ```text
//! frame -> phase gate -> rate limiter -> decode -> ownership lookup
//!       -> authorization guard -> registry/room mutation -> actions
//! ```
//!
//! The ownership lookup is the only blocking point; no mutation happens
//! before it resolves. Rejected and denied events produce an Error frame for
//! the sender alone - only authentication failure closes the connection.
//!
//! # Concurrency
//!
//! Methods take `&self` plus the caller's own `&mut Connection`. Each
//! transport task owns exactly one connection and calls into the dispatcher
//! serially, which gives per-connection event ordering and makes disconnect
//! cleanup naturally fenced: no in-flight handler for a connection can run
//! concurrently with its cleanup. The shared registries synchronize per key
//! internally.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use fleetframe_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::{session, tracking},
};

use crate::{
    audit::{AuditLog, LifecycleAction, SecurityEventKind, Severity},
    auth::{ConnectionContext, TokenAuthenticator},
    connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionPhase},
    env::Environment,
    error::EventError,
    fare::{VehicleType, compute_fare},
    guard,
    rate_limit::{EventKind, RateDecision, RateLimitTable, RateLimiter},
    registry::{ConnectionBinding, DriverPresence, DriverRegistry},
    rooms::RoomRouter,
    store::DeliveryStore,
};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Per-connection lifecycle timing
    pub connection: ConnectionConfig,
    /// Per-event-kind rate limits
    pub rate_limits: RateLimitTable,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            connection: ConnectionConfig::default(),
            rate_limits: RateLimitTable::default(),
        }
    }
}

/// Log levels carried by [`Action::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Actions the dispatcher produces for the runtime to execute.
///
/// Broadcasts are fire-and-forget: delivery to a member whose transport has
/// already closed is silently dropped by the executor.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a frame to a specific connection
    Send {
        /// Target connection
        connection_id: u64,
        /// Frame to send
        frame: Frame,
    },

    /// Send a frame to every current member of a delivery's room
    Broadcast {
        /// Room to broadcast to
        delivery_id: u64,
        /// Frame to broadcast
        frame: Frame,
        /// Connection to exclude (usually the sender)
        exclude: Option<u64>,
    },

    /// Close a connection
    Close {
        /// Connection to close
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// The dispatch-authorization core.
///
/// Shared process-wide behind an `Arc`; see the module docs for the
/// concurrency discipline.
pub struct Dispatcher<E, S, A>
where
    E: Environment,
    S: DeliveryStore,
    A: AuditLog,
{
    env: E,
    store: S,
    audit: A,
    auth: TokenAuthenticator,
    registry: DriverRegistry,
    rooms: RoomRouter,
    limiter: RateLimiter<E::Instant>,
    config: CoreConfig,
    open_connections: AtomicUsize,
}

impl<E, S, A> Dispatcher<E, S, A>
where
    E: Environment,
    S: DeliveryStore,
    A: AuditLog,
{
    /// Create a new dispatcher.
    pub fn new(env: E, store: S, audit: A, auth: TokenAuthenticator, config: CoreConfig) -> Self {
        Self {
            env,
            store,
            audit,
            auth,
            registry: DriverRegistry::new(),
            rooms: RoomRouter::new(),
            limiter: RateLimiter::new(),
            config,
            open_connections: AtomicUsize::new(0),
        }
    }

    /// The active registry (read access for runtime and tests).
    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// The room router (read access for runtime and tests).
    #[must_use]
    pub fn rooms(&self) -> &RoomRouter {
        &self.rooms
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.open_connections.load(Ordering::Relaxed)
    }

    /// Accept a new transport connection.
    ///
    /// Returns the connection state machine the transport task will own,
    /// plus actions. Over capacity, the connection comes back already closed
    /// with a `Close` action.
    pub fn accept(&self, remote_addr: SocketAddr) -> (Connection<E::Instant>, Vec<Action>) {
        let now = self.env.now();
        let id = self.env.random_u64();
        let mut conn = Connection::new(id, remote_addr, now, self.config.connection.clone());

        let admitted = self
            .open_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_connections).then_some(n + 1)
            })
            .is_ok();

        if !admitted {
            // Nothing was registered for this connection; consume its
            // cleanup claim so the transport's disconnect call is a no-op.
            conn.begin_cleanup();
            return (conn, vec![Action::Close {
                connection_id: id,
                reason: "max connections exceeded".to_string(),
            }]);
        }

        let actions = vec![Action::Log {
            level: LogLevel::Debug,
            message: format!("connection {id} accepted from {remote_addr}"),
        }];
        (conn, actions)
    }

    /// Process one inbound frame for a connection.
    pub fn handle_frame(&self, conn: &mut Connection<E::Instant>, frame: &Frame) -> Vec<Action> {
        if conn.phase() == ConnectionPhase::Closed {
            // Cleanup already ran (or the connection was refused); nothing
            // may mutate state attributed to it anymore.
            return Vec::new();
        }

        let now = self.env.now();
        conn.update_activity(now);

        let Some(opcode) = frame.header.opcode_enum() else {
            return self.refuse(
                conn,
                &EventError::Validation(format!("unknown opcode {:#06x}", frame.header.opcode())),
            );
        };

        match opcode {
            Opcode::Hello => self.handle_hello(conn, frame),
            Opcode::Ping => vec![Action::Send { connection_id: conn.id(), frame: conn.pong() }],
            Opcode::Pong => Vec::new(), // activity already refreshed
            Opcode::Goodbye => self.handle_goodbye(conn, frame),

            Opcode::LocationUpdate
            | Opcode::TrackDelivery
            | Opcode::StopTracking
            | Opcode::FareQuote => {
                let Some(ctx) = conn.context().cloned().filter(|_| conn.is_active()) else {
                    return self.refuse(
                        conn,
                        &EventError::Unauthenticated("event before handshake".to_string()),
                    );
                };

                match opcode {
                    Opcode::LocationUpdate => self.handle_location_update(conn, &ctx, frame),
                    Opcode::TrackDelivery => self.handle_track_delivery(conn, &ctx, frame),
                    Opcode::StopTracking => self.handle_stop_tracking(conn, frame),
                    _ => self.handle_fare_quote(conn, frame),
                }
            },

            Opcode::HelloReply
            | Opcode::DriverLocation
            | Opcode::StatusUpdate
            | Opcode::FareEstimate
            | Opcode::Error => self.refuse(
                conn,
                &EventError::Validation(format!(
                    "opcode {:#06x} is server-sent only",
                    opcode.to_u16()
                )),
            ),
        }
    }

    /// Run disconnect cleanup for a connection. Idempotent.
    ///
    /// Removes the driver presence (guarded by connection id, so a stale
    /// disconnect cannot evict a newer login's presence), persists the
    /// offline flag, unbinds the connection, leaves all rooms, forgets rate
    /// windows, and emits one lifecycle audit event.
    pub fn disconnect(&self, conn: &mut Connection<E::Instant>, reason: &str) -> Vec<Action> {
        if !conn.begin_cleanup() {
            return Vec::new();
        }

        self.open_connections.fetch_sub(1, Ordering::SeqCst);
        let now_ms = self.env.wall_clock_ms();
        let rooms_left = self.rooms.leave_all(conn.id());
        self.limiter.forget(conn.id());

        let mut actions = Vec::new();

        if let Some(ctx) = conn.context().cloned() {
            let was_live = self.registry.unbind_connection_if(ctx.user_id, conn.id());

            if ctx.role.is_driver() {
                self.registry.remove_driver_if(ctx.user_id, conn.id());

                // Only the driver's live connection marks it offline; a
                // stale disconnect superseded by a newer login must not.
                if was_live {
                    if let Err(e) = self.store.set_driver_offline(ctx.user_id, now_ms) {
                        tracing::warn!(
                            driver_id = ctx.user_id,
                            error = %e,
                            "failed to persist driver offline flag"
                        );
                        actions.push(Action::Log {
                            level: LogLevel::Warn,
                            message: format!(
                                "offline persist failed for driver {}: {e}",
                                ctx.user_id
                            ),
                        });
                    }
                }
            }

            let duration_ms = now_ms.saturating_sub(ctx.connected_at_ms);
            self.audit.lifecycle_event(
                ctx.user_id,
                LifecycleAction::Disconnected,
                &format!(
                    "connection_id={}, reason={reason}, duration_ms={duration_ms}, rooms_left={}",
                    conn.id(),
                    rooms_left.len()
                ),
            );

            actions.push(Action::Log {
                level: LogLevel::Info,
                message: format!("connection {} closed: {reason}", conn.id()),
            });
        } else {
            actions.push(Action::Log {
                level: LogLevel::Debug,
                message: format!("unauthenticated connection {} closed: {reason}", conn.id()),
            });
        }

        actions
    }

    /// Periodic maintenance for one connection (timeouts, heartbeats).
    pub fn tick(&self, conn: &mut Connection<E::Instant>) -> Vec<Action> {
        let now = self.env.now();
        let connection_id = conn.id();
        conn.tick(now).into_iter().map(|a| lift(connection_id, a)).collect()
    }

    fn handle_hello(&self, conn: &mut Connection<E::Instant>, frame: &Frame) -> Vec<Action> {
        if conn.phase() != ConnectionPhase::Connecting {
            return self.refuse(conn, &EventError::Validation("duplicate Hello".to_string()));
        }

        let hello = match Payload::from_frame(frame) {
            Ok(Payload::Hello(hello)) => hello,
            _ => {
                return self.refuse(
                    conn,
                    &EventError::Unauthenticated("malformed Hello".to_string()),
                );
            },
        };

        if hello.version != 1 {
            return self.refuse(
                conn,
                &EventError::Unauthenticated(format!(
                    "unsupported protocol version {}",
                    hello.version
                )),
            );
        }

        let claims = match self.auth.verify(&hello.token) {
            Ok(claims) => claims,
            Err(e) => return self.refuse(conn, &EventError::Unauthenticated(e.to_string())),
        };

        let now = self.env.now();
        let now_ms = self.env.wall_clock_ms();
        let ctx = ConnectionContext {
            connection_id: conn.id(),
            user_id: claims.sub,
            role: claims.role,
            remote_addr: conn.remote_addr(),
            user_agent: hello.user_agent,
            connected_at_ms: now_ms,
            verified: claims.verified,
        };

        if conn.authenticate(ctx, now).is_err() || conn.activate().is_err() {
            // Phase was checked above; reaching here means the machine was
            // driven out from under us, which is a caller bug.
            return self.refuse(conn, &EventError::Validation("handshake out of order".to_string()));
        }

        // Bind after the machine accepts the identity; a newer login for the
        // same user supersedes the old binding.
        self.registry.bind_connection(claims.sub, ConnectionBinding {
            connection_id: conn.id(),
            role: claims.role,
            bound_at_ms: now_ms,
        });

        self.audit.lifecycle_event(
            claims.sub,
            LifecycleAction::Connected,
            &format!(
                "connection_id={}, role={}, remote={}",
                conn.id(),
                claims.role,
                conn.remote_addr()
            ),
        );

        let reply = Payload::HelloReply(session::HelloReply {
            connection_id: conn.id(),
            heartbeat_secs: self.config.connection.heartbeat_interval.as_secs(),
        })
        .into_frame(FrameHeader::new(Opcode::HelloReply));

        match reply {
            Ok(frame) => vec![
                Action::Send { connection_id: conn.id(), frame },
                Action::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "connection {} authenticated as user {} ({})",
                        conn.id(),
                        claims.sub,
                        claims.role
                    ),
                },
            ],
            Err(e) => vec![Action::Log {
                level: LogLevel::Error,
                message: format!("failed to encode HelloReply: {e}"),
            }],
        }
    }

    fn handle_goodbye(&self, conn: &mut Connection<E::Instant>, frame: &Frame) -> Vec<Action> {
        let reason = match Payload::from_frame(frame) {
            Ok(Payload::Goodbye(goodbye)) => goodbye.reason,
            _ => "goodbye".to_string(),
        };

        let connection_id = conn.id();
        match conn.acknowledge_goodbye(&reason) {
            Ok(actions) => actions.into_iter().map(|a| lift(connection_id, a)).collect(),
            Err(_) => vec![Action::Close { connection_id, reason }],
        }
    }

    fn handle_location_update(
        &self,
        conn: &mut Connection<E::Instant>,
        ctx: &ConnectionContext,
        frame: &Frame,
    ) -> Vec<Action> {
        if let Some(actions) = self.rate_limit(conn, EventKind::LocationUpdate) {
            return actions;
        }

        let update = match Payload::from_frame(frame) {
            Ok(Payload::LocationUpdate(update)) => update,
            _ => {
                return self.refuse(
                    conn,
                    &EventError::Validation("malformed location update".to_string()),
                );
            },
        };

        // Ownership lookup resolves before any mutation.
        let ownership = match update.delivery_id {
            Some(delivery_id) => match self.store.delivery_ownership(delivery_id) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(delivery_id, error = %e, "ownership lookup failed");
                    return self.refuse(conn, &EventError::Upstream(e.to_string()));
                },
            },
            None => None,
        };

        if let Err(deny) = guard::authorize_location_update(ctx, &update, ownership.as_ref()) {
            if deny.is_security_event() {
                self.audit.security_event(
                    SecurityEventKind::UnauthorizedLocationUpdate,
                    Severity::Critical,
                    ctx.user_id,
                    &format!(
                        "connection_id={}, delivery_id={:?}, remote={}",
                        conn.id(),
                        update.delivery_id,
                        ctx.remote_addr
                    ),
                );
            }
            return self.refuse(conn, &deny.into());
        }

        let now_ms = self.env.wall_clock_ms();
        self.registry.upsert_driver(ctx.user_id, DriverPresence {
            lat: update.lat,
            lng: update.lng,
            heading: update.heading,
            delivery_id: update.delivery_id,
            connection_id: conn.id(),
            updated_at_ms: now_ms,
            verified: ctx.verified,
        });

        let mut actions = Vec::new();

        // A lost write is tolerable; lost live tracking is not. The presence
        // update above stands even when persistence is down.
        if let Err(e) = self.store.set_driver_location(ctx.user_id, update.lat, update.lng, now_ms)
        {
            tracing::warn!(driver_id = ctx.user_id, error = %e, "location persist failed");
            actions.push(Action::Log {
                level: LogLevel::Warn,
                message: format!("location persist failed for driver {}: {e}", ctx.user_id),
            });
        }

        if let Some(delivery_id) = update.delivery_id {
            let mut header = FrameHeader::new(Opcode::DriverLocation);
            header.set_sender_id(ctx.user_id);
            header.set_delivery_id(delivery_id);

            let broadcast = Payload::DriverLocation(tracking::DriverLocation {
                driver_id: ctx.user_id,
                lat: update.lat,
                lng: update.lng,
                heading: update.heading,
                timestamp_ms: now_ms,
            })
            .into_frame(header);

            match broadcast {
                Ok(frame) => actions.push(Action::Broadcast {
                    delivery_id,
                    frame,
                    exclude: Some(conn.id()),
                }),
                Err(e) => actions.push(Action::Log {
                    level: LogLevel::Error,
                    message: format!("failed to encode driver-location broadcast: {e}"),
                }),
            }
        }

        actions
    }

    fn handle_track_delivery(
        &self,
        conn: &mut Connection<E::Instant>,
        ctx: &ConnectionContext,
        frame: &Frame,
    ) -> Vec<Action> {
        if let Some(actions) = self.rate_limit(conn, EventKind::TrackDelivery) {
            return actions;
        }

        let request = match Payload::from_frame(frame) {
            Ok(Payload::TrackDelivery(request)) => request,
            _ => {
                return self.refuse(
                    conn,
                    &EventError::Validation("malformed track-delivery request".to_string()),
                );
            },
        };
        let delivery_id = request.delivery_id;

        let ownership = match self.store.delivery_ownership(delivery_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(delivery_id, error = %e, "ownership lookup failed");
                return self.refuse(conn, &EventError::Upstream(e.to_string()));
            },
        };

        if let Err(deny) = guard::authorize_track(ctx, delivery_id, ownership.as_ref()) {
            if deny.is_security_event() {
                self.audit.security_event(
                    SecurityEventKind::UnauthorizedTracking,
                    Severity::Critical,
                    ctx.user_id,
                    &format!(
                        "connection_id={}, delivery_id={delivery_id}, remote={}",
                        conn.id(),
                        ctx.remote_addr
                    ),
                );
            }
            return self.refuse(conn, &deny.into());
        }

        // The guard passed, so the lookup was non-empty.
        let Some(record) = ownership else {
            return self.refuse(conn, &EventError::NotFound { delivery_id });
        };

        self.rooms.join(delivery_id, conn.id());

        let mut header = FrameHeader::new(Opcode::StatusUpdate);
        header.set_delivery_id(delivery_id);

        let reply = Payload::StatusUpdate(tracking::StatusUpdate {
            delivery_id,
            status: record.status,
            timestamp_ms: self.env.wall_clock_ms(),
        })
        .into_frame(header);

        match reply {
            Ok(frame) => vec![Action::Send { connection_id: conn.id(), frame }],
            Err(e) => vec![Action::Log {
                level: LogLevel::Error,
                message: format!("failed to encode status update: {e}"),
            }],
        }
    }

    fn handle_stop_tracking(&self, conn: &mut Connection<E::Instant>, frame: &Frame) -> Vec<Action> {
        let request = match Payload::from_frame(frame) {
            Ok(Payload::StopTracking(request)) => request,
            _ => {
                return self.refuse(
                    conn,
                    &EventError::Validation("malformed stop-tracking request".to_string()),
                );
            },
        };

        self.rooms.leave(request.delivery_id, conn.id());

        vec![Action::Log {
            level: LogLevel::Debug,
            message: format!(
                "connection {} stopped tracking delivery {}",
                conn.id(),
                request.delivery_id
            ),
        }]
    }

    fn handle_fare_quote(&self, conn: &mut Connection<E::Instant>, frame: &Frame) -> Vec<Action> {
        if let Some(actions) = self.rate_limit(conn, EventKind::FareQuote) {
            return actions;
        }

        let quote = match Payload::from_frame(frame) {
            Ok(Payload::FareQuote(quote)) => quote,
            _ => {
                return self.refuse(
                    conn,
                    &EventError::Validation("malformed fare-quote request".to_string()),
                );
            },
        };

        if !quote.distance_km.is_finite() || quote.distance_km < 0.0 {
            return self.refuse(
                conn,
                &EventError::Validation(format!("invalid distance: {}", quote.distance_km)),
            );
        }
        if !quote.duration_min.is_finite() || quote.duration_min < 0.0 {
            return self.refuse(
                conn,
                &EventError::Validation(format!("invalid duration: {}", quote.duration_min)),
            );
        }

        let now = DateTime::<Utc>::from_timestamp_millis(self.env.wall_clock_ms() as i64)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let breakdown = compute_fare(
            quote.distance_km,
            VehicleType::parse_lenient(&quote.vehicle),
            quote.duration_min,
            now,
        );

        match Payload::FareEstimate(breakdown).into_frame(FrameHeader::new(Opcode::FareEstimate)) {
            Ok(frame) => vec![Action::Send { connection_id: conn.id(), frame }],
            Err(e) => vec![Action::Log {
                level: LogLevel::Error,
                message: format!("failed to encode fare estimate: {e}"),
            }],
        }
    }

    /// Apply the rate limiter for an event kind.
    ///
    /// Returns `Some(actions)` when the event must be dropped. Limited
    /// events never reach decoding, the guard, or any handler.
    fn rate_limit(&self, conn: &mut Connection<E::Instant>, kind: EventKind) -> Option<Vec<Action>> {
        let limit = self.config.rate_limits.limit_for(kind)?;
        let now = self.env.now();

        match self.limiter.check(conn.id(), kind, limit, now) {
            RateDecision::Allowed => None,
            RateDecision::Limited { retry_after } => {
                Some(self.refuse(conn, &EventError::RateLimited { kind, retry_after }))
            },
        }
    }

    /// Convert an event error into actions: an Error frame for the sender,
    /// plus connection closure for authentication failures.
    fn refuse(&self, conn: &mut Connection<E::Instant>, err: &EventError) -> Vec<Action> {
        let mut actions = Vec::new();

        if let Ok(frame) = Payload::Error(err.to_payload()).into_frame(FrameHeader::new(Opcode::Error))
        {
            actions.push(Action::Send { connection_id: conn.id(), frame });
        }

        if err.closes_connection() {
            conn.close();
            actions.push(Action::Close { connection_id: conn.id(), reason: err.to_string() });
        }

        actions
    }
}

impl<E, S, A> std::fmt::Debug for Dispatcher<E, S, A>
where
    E: Environment,
    S: DeliveryStore,
    A: AuditLog,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection_count", &self.connection_count())
            .field("driver_count", &self.registry.driver_count())
            .field("room_count", &self.rooms.room_count())
            .finish()
    }
}

/// Lift a connection-level action to a dispatcher action.
fn lift(connection_id: u64, action: ConnectionAction) -> Action {
    match action {
        ConnectionAction::SendFrame(frame) => Action::Send { connection_id, frame },
        ConnectionAction::Close { reason } => Action::Close { connection_id, reason },
    }
}
