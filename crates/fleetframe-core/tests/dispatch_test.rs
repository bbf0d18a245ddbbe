//! Integration tests for the dispatcher.
//!
//! Drives the full event path - handshake, rate limiting, authorization,
//! registry/room mutation, lifecycle cleanup - through the public API with
//! deterministic collaborators.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::TimeZone;
use fleetframe_core::{
    Action, Claims, Connection, ConnectionPhase, CoreConfig, DeliveryOwnership, Dispatcher,
    Environment, MemoryDeliveryStore, RecordingAudit, TokenAuthenticator,
    audit::AuditRecord,
};
use fleetframe_proto::{
    DeliveryStatus, ErrorPayload, Frame, FrameHeader, Opcode, Payload, Role,
    payloads::{fare, session, tracking},
};

const SECRET: &[u8] = b"integration-test-secret";

/// Deterministic environment: sequential connection ids, settable wall clock.
#[derive(Clone)]
struct TestEnv {
    next_id: Arc<AtomicU64>,
    wall_ms: Arc<AtomicU64>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(0)),
            wall_ms: Arc::new(AtomicU64::new(1_700_000_000_000)),
        }
    }

    fn set_wall_ms(&self, ms: u64) {
        self.wall_ms.store(ms, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock_ms(&self) -> u64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = n.to_be_bytes();
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = bytes[i % 8];
        }
    }
}

type TestDispatcher = Dispatcher<TestEnv, MemoryDeliveryStore, RecordingAudit>;

struct Harness {
    env: TestEnv,
    store: MemoryDeliveryStore,
    audit: RecordingAudit,
    auth: TokenAuthenticator,
    dispatcher: TestDispatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    fn with_config(config: CoreConfig) -> Self {
        let env = TestEnv::new();
        let store = MemoryDeliveryStore::new();
        let audit = RecordingAudit::new();
        let auth = TokenAuthenticator::new(SECRET);
        let dispatcher =
            Dispatcher::new(env.clone(), store.clone(), audit.clone(), auth.clone(), config);
        Self { env, store, audit, auth, dispatcher }
    }

    fn token(&self, user_id: u64, role: Role) -> String {
        let now = chrono::Utc::now().timestamp();
        self.auth
            .issue(&Claims { sub: user_id, role, iat: now, exp: now + 3600, verified: true })
            .unwrap()
    }

    /// Accept a connection and complete the handshake.
    fn connect(&self, user_id: u64, role: Role) -> Connection<std::time::Instant> {
        let (mut conn, _) = self.dispatcher.accept(addr());
        let actions = self.dispatcher.handle_frame(&mut conn, &hello(&self.token(user_id, role)));

        assert!(
            sent_payloads(&actions).iter().any(|p| matches!(p, Payload::HelloReply(_))),
            "handshake should produce a HelloReply, got {actions:?}"
        );
        assert_eq!(conn.phase(), ConnectionPhase::Active);
        conn
    }
}

fn addr() -> SocketAddr {
    "203.0.113.7:9100".parse().unwrap()
}

fn hello(token: &str) -> Frame {
    Payload::Hello(session::Hello {
        version: 1,
        token: token.to_string(),
        user_agent: Some("fleetframe-test/1.0".to_string()),
    })
    .into_frame(FrameHeader::new(Opcode::Hello))
    .unwrap()
}

fn location(lat: f64, lng: f64, delivery_id: Option<u64>) -> Frame {
    Payload::LocationUpdate(tracking::LocationUpdate { lat, lng, heading: 45.0, delivery_id })
        .into_frame(FrameHeader::new(Opcode::LocationUpdate))
        .unwrap()
}

fn track(delivery_id: u64) -> Frame {
    Payload::TrackDelivery(tracking::TrackDelivery { delivery_id })
        .into_frame(FrameHeader::new(Opcode::TrackDelivery))
        .unwrap()
}

fn stop_tracking(delivery_id: u64) -> Frame {
    Payload::StopTracking(tracking::StopTracking { delivery_id })
        .into_frame(FrameHeader::new(Opcode::StopTracking))
        .unwrap()
}

fn fare_quote(distance_km: f64, vehicle: &str, duration_min: f64) -> Frame {
    Payload::FareQuote(fare::FareQuote {
        distance_km,
        vehicle: vehicle.to_string(),
        duration_min,
    })
    .into_frame(FrameHeader::new(Opcode::FareQuote))
    .unwrap()
}

/// Payloads of all Send actions, decoded.
fn sent_payloads(actions: &[Action]) -> Vec<Payload> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Send { frame, .. } => Some(Payload::from_frame(frame).unwrap()),
            _ => None,
        })
        .collect()
}

/// The single error payload among the actions, if any.
fn sent_error(actions: &[Action]) -> Option<ErrorPayload> {
    sent_payloads(actions).into_iter().find_map(|p| match p {
        Payload::Error(e) => Some(e),
        _ => None,
    })
}

fn has_close(actions: &[Action]) -> bool {
    actions.iter().any(|a| matches!(a, Action::Close { .. }))
}

fn active_delivery(customer_id: u64, driver_id: u64) -> DeliveryOwnership {
    DeliveryOwnership { customer_id, driver_id: Some(driver_id), status: DeliveryStatus::InTransit }
}

// --- handshake ---

#[test]
fn handshake_binds_connection_and_audits() {
    let h = Harness::new();
    let conn = h.connect(7, Role::Driver);

    let binding = h.dispatcher.registry().binding(7).unwrap();
    assert_eq!(binding.connection_id, conn.id());
    assert_eq!(binding.role, Role::Driver);
    assert_eq!(h.dispatcher.connection_count(), 1);

    let lifecycle = h.audit.lifecycle_events();
    assert_eq!(lifecycle.len(), 1);
    assert!(matches!(
        lifecycle[0],
        AuditRecord::Lifecycle { actor_id: 7, .. }
    ));
}

#[test]
fn bad_token_closes_before_any_state_exists() {
    let h = Harness::new();
    let (mut conn, _) = h.dispatcher.accept(addr());

    let actions = h.dispatcher.handle_frame(&mut conn, &hello("garbage-token"));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHENTICATED);
    assert!(has_close(&actions));
    assert_eq!(conn.phase(), ConnectionPhase::Closed);
    assert_eq!(h.dispatcher.registry().binding_count(), 0);
    assert!(h.audit.lifecycle_events().is_empty());
}

#[test]
fn expired_token_rejected() {
    let h = Harness::new();
    let now = chrono::Utc::now().timestamp();
    let token = h
        .auth
        .issue(&Claims {
            sub: 7,
            role: Role::Driver,
            iat: now - 7200,
            exp: now - 3600,
            verified: false,
        })
        .unwrap();

    let (mut conn, _) = h.dispatcher.accept(addr());
    let actions = h.dispatcher.handle_frame(&mut conn, &hello(&token));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHENTICATED);
    assert!(has_close(&actions));
}

#[test]
fn event_before_handshake_closes_connection() {
    let h = Harness::new();
    let (mut conn, _) = h.dispatcher.accept(addr());

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, None));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHENTICATED);
    assert!(has_close(&actions));
    assert_eq!(h.dispatcher.registry().driver_count(), 0);
}

#[test]
fn max_connections_rejects_excess() {
    let h = Harness::with_config(CoreConfig { max_connections: 1, ..CoreConfig::default() });

    let _first = h.connect(1, Role::Customer);
    assert_eq!(h.dispatcher.connection_count(), 1);

    let (second, actions) = h.dispatcher.accept(addr());
    assert!(has_close(&actions));
    assert_eq!(second.phase(), ConnectionPhase::Closed);
    assert_eq!(h.dispatcher.connection_count(), 1);
}

// --- location updates ---

#[test]
fn location_update_creates_presence_and_persists() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.97, 77.59, None));
    assert!(sent_error(&actions).is_none());

    let presence = h.dispatcher.registry().driver(7).unwrap();
    assert!((presence.lat - 12.97).abs() < f64::EPSILON);
    assert_eq!(presence.connection_id, conn.id());
    assert_eq!(presence.delivery_id, None);

    let writes = h.store.location_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].driver_id, 7);

    // No delivery id: nothing to broadcast
    assert!(!actions.iter().any(|a| matches!(a, Action::Broadcast { .. })));
}

#[test]
fn location_update_for_owned_delivery_broadcasts_to_room() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));

    let mut driver = h.connect(7, Role::Driver);
    let mut customer = h.connect(500, Role::Customer);

    // Customer subscribes first
    let actions = h.dispatcher.handle_frame(&mut customer, &track(900));
    assert!(matches!(sent_payloads(&actions)[0], Payload::StatusUpdate(_)));
    assert!(h.dispatcher.rooms().is_member(900, customer.id()));

    // Driver publishes
    let actions = h.dispatcher.handle_frame(&mut driver, &location(12.9, 77.6, Some(900)));
    let broadcast = actions
        .iter()
        .find_map(|a| match a {
            Action::Broadcast { delivery_id, frame, exclude } => Some((delivery_id, frame, exclude)),
            _ => None,
        })
        .expect("owned-delivery update should broadcast");

    assert_eq!(*broadcast.0, 900);
    assert_eq!(*broadcast.2, Some(driver.id()), "sender is excluded");

    match Payload::from_frame(broadcast.1).unwrap() {
        Payload::DriverLocation(dl) => {
            assert_eq!(dl.driver_id, 7);
            assert!((dl.lat - 12.9).abs() < f64::EPSILON);
        },
        other => panic!("expected DriverLocation broadcast, got {other:?}"),
    }
}

#[test]
fn foreign_delivery_update_denied_with_one_security_event() {
    let h = Harness::new();
    // Delivery 900 is assigned to driver 8, not driver 7
    h.store.insert_delivery(900, active_delivery(500, 8));

    let mut conn = h.connect(7, Role::Driver);
    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, Some(900)));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHORIZED);
    assert!(!has_close(&actions), "unauthorized does not close the connection");
    assert!(h.dispatcher.registry().driver(7).is_none(), "no presence on denial");
    assert!(h.store.location_writes().is_empty());

    assert_eq!(h.audit.security_events().len(), 1, "exactly one security event");
}

#[test]
fn inactive_delivery_update_is_retryable_not_security() {
    let h = Harness::new();
    h.store.insert_delivery(900, DeliveryOwnership {
        customer_id: 500,
        driver_id: Some(7),
        status: DeliveryStatus::Delivered,
    });

    let mut conn = h.connect(7, Role::Driver);
    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, Some(900)));

    let error = sent_error(&actions).unwrap();
    assert_eq!(error.code, ErrorPayload::INVALID_STATE);
    assert!(error.retry_after.is_some());
    assert!(h.audit.security_events().is_empty());
}

#[test]
fn out_of_range_coordinates_rejected_as_validation() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    let actions = h.dispatcher.handle_frame(&mut conn, &location(91.0, 77.6, None));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::VALIDATION);
    assert!(h.dispatcher.registry().driver(7).is_none());
    assert!(h.audit.security_events().is_empty());
}

#[test]
fn customer_cannot_publish_location() {
    let h = Harness::new();
    let mut conn = h.connect(500, Role::Customer);

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, None));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHORIZED);
    assert_eq!(h.audit.security_events().len(), 1);
}

#[test]
fn persist_failure_keeps_live_tracking() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);
    h.store.set_fail_writes(true);

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, None));

    // No error frame to the sender; the in-memory presence still advanced
    assert!(sent_error(&actions).is_none());
    assert!(h.dispatcher.registry().driver(7).is_some());
    assert!(actions.iter().any(
        |a| matches!(a, Action::Log { message, .. } if message.contains("persist failed"))
    ));
}

#[test]
fn ownership_lookup_failure_blocks_mutation() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);
    h.store.set_fail_lookups(true);

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, Some(900)));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UPSTREAM);
    assert!(h.dispatcher.registry().driver(7).is_none(), "no mutation before lookup resolves");
}

// --- rate limiting ---

#[test]
fn sixty_first_location_update_in_window_is_limited() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    for i in 0..60 {
        let actions = h.dispatcher.handle_frame(&mut conn, &location(12.0, 77.0, None));
        assert!(sent_error(&actions).is_none(), "update {i} should pass");
    }

    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.0, 77.0, None));
    let error = sent_error(&actions).unwrap();
    assert_eq!(error.code, ErrorPayload::RATE_LIMITED);
    assert!(error.retry_after.is_some());
    assert!(!has_close(&actions), "rate limiting never closes the connection");

    // The 61st event mutated nothing: presence still reflects update 60
    assert_eq!(h.store.location_writes().len(), 60);
}

#[test]
fn track_delivery_has_its_own_tighter_limit() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));
    let mut conn = h.connect(500, Role::Customer);

    for _ in 0..10 {
        let actions = h.dispatcher.handle_frame(&mut conn, &track(900));
        assert!(sent_error(&actions).is_none());
    }

    let actions = h.dispatcher.handle_frame(&mut conn, &track(900));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::RATE_LIMITED);
}

// --- tracking subscriptions ---

#[test]
fn track_delivery_allowed_for_all_parties() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));

    for (user, role) in [(500, Role::Customer), (7, Role::Driver), (1, Role::Admin)] {
        let mut conn = h.connect(user, role);
        let actions = h.dispatcher.handle_frame(&mut conn, &track(900));

        match &sent_payloads(&actions)[0] {
            Payload::StatusUpdate(status) => {
                assert_eq!(status.delivery_id, 900);
                assert_eq!(status.status, DeliveryStatus::InTransit);
            },
            other => panic!("expected StatusUpdate for {role:?}, got {other:?}"),
        }
        assert!(h.dispatcher.rooms().is_member(900, conn.id()));
    }
}

#[test]
fn track_delivery_denied_for_stranger_with_security_event() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));

    let mut conn = h.connect(600, Role::Customer);
    let actions = h.dispatcher.handle_frame(&mut conn, &track(900));

    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::UNAUTHORIZED);
    assert!(!h.dispatcher.rooms().is_member(900, conn.id()));
    assert_eq!(h.audit.security_events().len(), 1);
}

#[test]
fn track_unknown_delivery_is_not_found() {
    let h = Harness::new();
    let mut conn = h.connect(1, Role::Admin);

    let actions = h.dispatcher.handle_frame(&mut conn, &track(404));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::NOT_FOUND);
}

#[test]
fn stop_tracking_leaves_room_before_next_broadcast() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));

    let mut driver = h.connect(7, Role::Driver);
    let mut customer = h.connect(500, Role::Customer);
    let mut admin = h.connect(1, Role::Admin);

    h.dispatcher.handle_frame(&mut customer, &track(900));
    h.dispatcher.handle_frame(&mut admin, &track(900));
    assert_eq!(h.dispatcher.rooms().member_count(900), 2);

    h.dispatcher.handle_frame(&mut customer, &stop_tracking(900));
    assert_eq!(h.dispatcher.rooms().members(900), vec![admin.id()]);

    // Broadcast after the leave targets only the remaining member
    let actions = h.dispatcher.handle_frame(&mut driver, &location(12.9, 77.6, Some(900)));
    let members_at_broadcast = h.dispatcher.rooms().members(900);
    assert_eq!(members_at_broadcast, vec![admin.id()]);
    assert!(actions.iter().any(|a| matches!(a, Action::Broadcast { .. })));
}

// --- fare quotes over the wire ---

#[test]
fn fare_quote_round_trip_off_peak() {
    let h = Harness::new();
    let off_peak = chrono::Utc.with_ymd_and_hms(2026, 3, 14, 14, 0, 0).single().unwrap();
    h.env.set_wall_ms(off_peak.timestamp_millis() as u64);

    let mut conn = h.connect(500, Role::Customer);
    let actions = h.dispatcher.handle_frame(&mut conn, &fare_quote(5.0, "bike", 12.0));

    match &sent_payloads(&actions)[0] {
        Payload::FareEstimate(estimate) => {
            assert_eq!(estimate.base_fare, 30);
            assert_eq!(estimate.total_fare, 76);
            assert_eq!(estimate.platform_commission, 9);
            assert_eq!(estimate.driver_earnings, 67);
            assert_eq!(estimate.surge_factor, None);
        },
        other => panic!("expected FareEstimate, got {other:?}"),
    }
}

#[test]
fn fare_quote_applies_surge_at_peak() {
    let h = Harness::new();
    let peak = chrono::Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).single().unwrap();
    h.env.set_wall_ms(peak.timestamp_millis() as u64);

    let mut conn = h.connect(500, Role::Customer);
    let actions = h.dispatcher.handle_frame(&mut conn, &fare_quote(15.0, "auto", 40.0));

    match &sent_payloads(&actions)[0] {
        Payload::FareEstimate(estimate) => {
            assert_eq!(estimate.surge_factor, Some(1.2));
            assert_eq!(estimate.total_fare, 344);
            assert_eq!(estimate.platform_commission, 41);
            assert_eq!(estimate.driver_earnings, 303);
        },
        other => panic!("expected FareEstimate, got {other:?}"),
    }
}

#[test]
fn fare_quote_rejects_nonsense_numbers() {
    let h = Harness::new();
    let mut conn = h.connect(500, Role::Customer);

    let actions = h.dispatcher.handle_frame(&mut conn, &fare_quote(f64::NAN, "bike", 10.0));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::VALIDATION);

    let actions = h.dispatcher.handle_frame(&mut conn, &fare_quote(-3.0, "bike", 10.0));
    assert_eq!(sent_error(&actions).unwrap().code, ErrorPayload::VALIDATION);
}

// --- disconnect and lifecycle ---

#[test]
fn driver_disconnect_cleans_up_and_persists_offline_once() {
    let h = Harness::new();
    h.store.insert_delivery(900, active_delivery(500, 7));

    let mut conn = h.connect(7, Role::Driver);
    h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, Some(900)));
    h.dispatcher.handle_frame(&mut conn, &track(900));
    assert!(h.dispatcher.registry().driver(7).is_some());

    let actions = h.dispatcher.disconnect(&mut conn, "transport closed");
    assert!(actions.iter().any(|a| matches!(a, Action::Log { .. })));

    assert!(h.dispatcher.registry().driver(7).is_none());
    assert!(h.dispatcher.registry().binding(7).is_none());
    assert_eq!(h.dispatcher.rooms().member_count(900), 0);
    assert_eq!(h.store.offline_writes().len(), 1);
    assert_eq!(h.dispatcher.connection_count(), 0);

    // Idempotent: a second disconnect does nothing
    let actions = h.dispatcher.disconnect(&mut conn, "again");
    assert!(actions.is_empty());
    assert_eq!(h.store.offline_writes().len(), 1);

    let lifecycle = h.audit.lifecycle_events();
    assert_eq!(lifecycle.len(), 2, "one connect + one disconnect event");
}

#[test]
fn stale_disconnect_does_not_evict_newer_login() {
    let h = Harness::new();

    // Driver 7 logs in and publishes
    let mut first = h.connect(7, Role::Driver);
    h.dispatcher.handle_frame(&mut first, &location(10.0, 70.0, None));

    // Same driver logs in again; new presence supersedes the old one
    let mut second = h.connect(7, Role::Driver);
    h.dispatcher.handle_frame(&mut second, &location(11.0, 71.0, None));

    let presence = h.dispatcher.registry().driver(7).unwrap();
    assert_eq!(presence.connection_id, second.id());

    // The superseded connection disconnects late
    h.dispatcher.disconnect(&mut first, "stale transport closed");

    // Newer presence and binding survive; no offline write was issued
    let presence = h.dispatcher.registry().driver(7).unwrap();
    assert_eq!(presence.connection_id, second.id());
    assert_eq!(h.dispatcher.registry().binding(7).unwrap().connection_id, second.id());
    assert!(h.store.offline_writes().is_empty());

    // The live connection's disconnect performs the real cleanup
    h.dispatcher.disconnect(&mut second, "transport closed");
    assert!(h.dispatcher.registry().driver(7).is_none());
    assert_eq!(h.store.offline_writes().len(), 1);
}

#[test]
fn frames_after_cleanup_mutate_nothing() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    h.dispatcher.disconnect(&mut conn, "closed");
    let actions = h.dispatcher.handle_frame(&mut conn, &location(12.9, 77.6, None));

    assert!(actions.is_empty());
    assert!(h.dispatcher.registry().driver(7).is_none());
}

#[test]
fn goodbye_is_acknowledged_and_closes() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    let goodbye = Payload::Goodbye(session::Goodbye { reason: "battery saver".to_string() })
        .into_frame(FrameHeader::new(Opcode::Goodbye))
        .unwrap();
    let actions = h.dispatcher.handle_frame(&mut conn, &goodbye);

    assert!(sent_payloads(&actions).iter().any(|p| matches!(p, Payload::Goodbye(_))));
    assert!(has_close(&actions));
    assert_eq!(conn.phase(), ConnectionPhase::Closed);
}

#[test]
fn ping_gets_pong() {
    let h = Harness::new();
    let mut conn = h.connect(7, Role::Driver);

    let ping = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
    let actions = h.dispatcher.handle_frame(&mut conn, &ping);

    assert!(matches!(sent_payloads(&actions)[0], Payload::Pong));
}
