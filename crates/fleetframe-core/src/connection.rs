//! Connection lifecycle state machine.
//!
//! One `Connection` per live transport connection, owned exclusively by that
//! connection's task. Uses the action pattern: methods take time as input and
//! return actions for the runtime to execute, keeping the machine pure and
//! deterministic under test.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐ valid Hello ┌───────────────┐ registry bind ┌────────┐
//! │ Connecting │────────────>│ Authenticated │──────────────>│ Active │
//! └────────────┘             └───────────────┘               └────────┘
//!       │                            │                            │
//!       │ bad token / timeout        │ (transient)                │ Goodbye / timeout / error
//!       ↓                            ↓                            ↓
//!  ┌────────┐                   ┌────────┐                   ┌────────┐
//!  │ Closed │                   │ Closed │                   │ Closed │
//!  └────────┘                   └────────┘                   └────────┘
//! ```
//!
//! `Authenticated` is transient: the dispatcher binds the connection into the
//! registry and promotes it to `Active` within the same Hello handling call.
//! No event arriving after `Closed` can mutate state attributed to this
//! connection - cleanup and event handling run on the same task.

use std::{net::SocketAddr, time::Duration};

use fleetframe_proto::{Frame, FrameHeader, Opcode, Payload};
use thiserror::Error;

use crate::auth::ConnectionContext;

/// Time allowed for the Hello frame to arrive and verify.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time without any traffic before the connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Interval at which the server sends Ping frames while active.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport open, waiting for the Hello credential
    Connecting,
    /// Credential verified, not yet registered
    Authenticated,
    /// Registered and participating in events
    Active,
    /// Terminated (graceful or error)
    Closed,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for the Hello frame to arrive and verify
    pub handshake_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be well under `idle_timeout`)
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Errors from invalid lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation attempted in a phase that does not allow it
    #[error("invalid transition: cannot {operation} while {phase:?}")]
    InvalidPhase {
        /// Phase when the error occurred
        phase: ConnectionPhase,
        /// Operation that was attempted
        operation: &'static str,
    },
}

/// Per-connection lifecycle state machine.
///
/// Pure state - no I/O, no shared references. Time is passed into the methods
/// that need it, generic over `Instant` so tests can drive a virtual clock.
#[derive(Debug, Clone)]
pub struct Connection<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    id: u64,
    phase: ConnectionPhase,
    config: ConnectionConfig,
    remote_addr: SocketAddr,
    context: Option<ConnectionContext>,
    opened_at: I,
    last_activity: I,
    last_heartbeat: Option<I>,
    cleaned_up: bool,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionPhase::Connecting`].
    pub fn new(id: u64, remote_addr: SocketAddr, now: I, config: ConnectionConfig) -> Self {
        Self {
            id,
            phase: ConnectionPhase::Connecting,
            config,
            remote_addr,
            context: None,
            opened_at: now,
            last_activity: now,
            last_heartbeat: None,
            cleaned_up: false,
        }
    }

    /// Server-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Originating address of the peer.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Authenticated identity. `None` until the handshake completes.
    #[must_use]
    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    /// Monotonic instant the transport connection was accepted.
    #[must_use]
    pub fn opened_at(&self) -> I {
        self.opened_at
    }

    /// Whether the connection may participate in tracking events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == ConnectionPhase::Active
    }

    /// Attach the verified identity: `Connecting -> Authenticated`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidPhase` unless currently `Connecting`.
    pub fn authenticate(
        &mut self,
        context: ConnectionContext,
        now: I,
    ) -> Result<(), ConnectionError> {
        if self.phase != ConnectionPhase::Connecting {
            return Err(ConnectionError::InvalidPhase {
                phase: self.phase,
                operation: "authenticate",
            });
        }

        self.context = Some(context);
        self.phase = ConnectionPhase::Authenticated;
        self.last_activity = now;
        Ok(())
    }

    /// Promote to `Active` once the registry bind has happened.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidPhase` unless currently `Authenticated`.
    pub fn activate(&mut self) -> Result<(), ConnectionError> {
        if self.phase != ConnectionPhase::Authenticated {
            return Err(ConnectionError::InvalidPhase { phase: self.phase, operation: "activate" });
        }

        self.phase = ConnectionPhase::Active;
        Ok(())
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    /// Claim responsibility for disconnect cleanup.
    ///
    /// Returns `true` exactly once per connection, no matter how many paths
    /// (Goodbye frame, transport close, fatal error) race to clean up.
    pub fn begin_cleanup(&mut self) -> bool {
        if self.cleaned_up {
            return false;
        }
        self.cleaned_up = true;
        self.phase = ConnectionPhase::Closed;
        true
    }

    /// Mark the connection as active (call when receiving frames).
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity, if the phase timeout is exceeded.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Authenticated => {
                self.config.handshake_timeout
            },
            ConnectionPhase::Active => self.config.idle_timeout,
            ConnectionPhase::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.phase {
                ConnectionPhase::Connecting | ConnectionPhase::Authenticated => {
                    format!("handshake timeout after {elapsed:?}")
                },
                _ => format!("idle timeout after {elapsed:?}"),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.phase == ConnectionPhase::Active {
            let due = match self.last_heartbeat {
                None => true,
                Some(last) => now - last >= self.config.heartbeat_interval,
            };

            if due {
                let ping = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
                actions.push(ConnectionAction::SendFrame(ping));
                self.last_heartbeat = Some(now);
            }
        }

        actions
    }

    /// Respond to a keepalive probe from the peer.
    #[must_use]
    pub fn pong(&self) -> Frame {
        Frame::new(FrameHeader::new(Opcode::Pong), Vec::new())
    }

    /// Acknowledge a peer Goodbye and close.
    ///
    /// # Errors
    ///
    /// Propagates payload encoding failure (never expected for Goodbye).
    pub fn acknowledge_goodbye(
        &mut self,
        peer_reason: &str,
    ) -> Result<Vec<ConnectionAction>, fleetframe_proto::ProtocolError> {
        self.close();

        let ack = Payload::Goodbye(fleetframe_proto::payloads::session::Goodbye {
            reason: "ack".to_string(),
        })
        .into_frame(FrameHeader::new(Opcode::Goodbye))?;

        Ok(vec![ConnectionAction::SendFrame(ack), ConnectionAction::Close {
            reason: format!("peer goodbye: {peer_reason}"),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use fleetframe_proto::Role;

    fn addr() -> SocketAddr {
        "203.0.113.9:4000".parse().unwrap()
    }

    fn ctx(connection_id: u64) -> ConnectionContext {
        ConnectionContext {
            connection_id,
            user_id: 7,
            role: Role::Driver,
            remote_addr: addr(),
            user_agent: None,
            connected_at_ms: 1_700_000_000_000,
            verified: true,
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());
        assert_eq!(conn.phase(), ConnectionPhase::Connecting);
        assert!(conn.context().is_none());

        conn.authenticate(ctx(1), t0).unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Authenticated);

        conn.activate().unwrap();
        assert!(conn.is_active());
        assert_eq!(conn.context().unwrap().user_id, 7);

        conn.close();
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn authenticate_twice_fails() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());

        conn.authenticate(ctx(1), t0).unwrap();
        let result = conn.authenticate(ctx(1), t0);
        assert!(matches!(result, Err(ConnectionError::InvalidPhase { .. })));
    }

    #[test]
    fn activate_requires_authentication() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());

        assert!(matches!(conn.activate(), Err(ConnectionError::InvalidPhase { .. })));
    }

    #[test]
    fn handshake_timeout_closes() {
        let t0 = Instant::now();
        let config = ConnectionConfig {
            handshake_timeout: Duration::from_secs(10),
            ..ConnectionConfig::default()
        };
        let mut conn = Connection::new(1, addr(), t0, config);

        let actions = conn.tick(t0 + Duration::from_secs(11));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn idle_timeout_counts_from_last_activity() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());
        conn.authenticate(ctx(1), t0).unwrap();
        conn.activate().unwrap();

        let t1 = t0 + Duration::from_secs(60);
        conn.update_activity(t1);

        // 60s after activity refresh: under the 90s idle timeout
        assert!(conn.check_timeout(t1 + Duration::from_secs(60)).is_none());
        // 91s after: over
        assert!(conn.check_timeout(t1 + Duration::from_secs(91)).is_some());
    }

    #[test]
    fn heartbeat_sent_while_active() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());
        conn.authenticate(ctx(1), t0).unwrap();
        conn.activate().unwrap();

        let actions = conn.tick(t0 + Duration::from_secs(1));
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConnectionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::Ping));
            },
            other => panic!("expected Ping, got {other:?}"),
        }

        // Second tick inside the interval sends nothing
        let actions = conn.tick(t0 + Duration::from_secs(2));
        assert!(actions.is_empty());
    }

    #[test]
    fn no_heartbeat_before_active() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());

        let actions = conn.tick(t0 + Duration::from_secs(1));
        assert!(actions.is_empty());
    }

    #[test]
    fn begin_cleanup_claims_exactly_once() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());

        assert!(conn.begin_cleanup());
        assert!(!conn.begin_cleanup());
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn goodbye_acknowledged_and_closed() {
        let t0 = Instant::now();
        let mut conn = Connection::new(1, addr(), t0, ConnectionConfig::default());
        conn.authenticate(ctx(1), t0).unwrap();
        conn.activate().unwrap();

        let actions = conn.acknowledge_goodbye("client shutdown").unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], ConnectionAction::SendFrame(_)));
        assert!(matches!(actions[1], ConnectionAction::Close { .. }));
    }
}
