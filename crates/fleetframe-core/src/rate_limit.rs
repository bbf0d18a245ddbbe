//! Per-connection, per-event-type rate limiting.
//!
//! Fixed-window counters guard high-frequency events. Each (connection id,
//! event kind) pair owns an independent window: the first event opens a
//! window with count 1; subsequent events increment while under the limit;
//! once the limit is reached, events are rejected without incrementing until
//! the window expires. Limits are supplied by the caller per event kind,
//! not hardcoded here.
//!
//! Rejected events never reach the authorization guard or any handler; the
//! sender alone is notified and no state is mutated.
//!
//! Windows live in a sharded concurrent map, so limiting one connection
//! never contends with another.

use std::time::Duration;

use dashmap::DashMap;

/// Rate-limited inbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Driver position sample
    LocationUpdate,
    /// Subscribe to a delivery's location stream
    TrackDelivery,
    /// Unsubscribe from a delivery's location stream
    StopTracking,
    /// Fare estimate request
    FareQuote,
}

impl EventKind {
    /// Stable name for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocationUpdate => "location-update",
            Self::TrackDelivery => "track-delivery",
            Self::StopTracking => "stop-tracking",
            Self::FareQuote => "fare-quote",
        }
    }
}

/// Limit for one event kind: at most `max_events` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLimit {
    /// Maximum events allowed inside one window
    pub max_events: u32,
    /// Window length
    pub window: Duration,
}

impl EventLimit {
    /// Convenience constructor.
    #[must_use]
    pub const fn per_window(max_events: u32, window: Duration) -> Self {
        Self { max_events, window }
    }
}

/// Per-event-kind limits supplied to the dispatcher.
///
/// Location updates are allowed far more frequently than tracking
/// subscriptions; stop-tracking is unlimited (leaving a room is harmless).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitTable {
    /// Limit for driver position samples
    pub location_update: EventLimit,
    /// Limit for tracking subscriptions
    pub track_delivery: EventLimit,
    /// Limit for fare estimate requests
    pub fare_quote: EventLimit,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            location_update: EventLimit::per_window(60, Duration::from_secs(60)),
            track_delivery: EventLimit::per_window(10, Duration::from_secs(60)),
            fare_quote: EventLimit::per_window(30, Duration::from_secs(60)),
        }
    }
}

impl RateLimitTable {
    /// Limit for an event kind. `None` means unlimited.
    #[must_use]
    pub fn limit_for(&self, kind: EventKind) -> Option<EventLimit> {
        match kind {
            EventKind::LocationUpdate => Some(self.location_update),
            EventKind::TrackDelivery => Some(self.track_delivery),
            EventKind::FareQuote => Some(self.fare_quote),
            EventKind::StopTracking => None,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Event may proceed
    Allowed,
    /// Event rejected; the window expires after `retry_after`
    Limited {
        /// Time until the current window expires
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the event may proceed.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// One fixed counting window.
#[derive(Debug, Clone, Copy)]
struct FixedWindow<I> {
    started: I,
    count: u32,
}

/// Fixed-window rate limiter over all connections.
///
/// Generic over `Instant` so tests drive a virtual clock. Each check is a
/// single entry operation on the sharded map; the shard lock makes the
/// read-modify-write atomic per key.
#[derive(Debug)]
pub struct RateLimiter<I> {
    windows: DashMap<(u64, EventKind), FixedWindow<I>>,
}

impl<I> RateLimiter<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    /// Check whether an event is within its limit, updating the window.
    ///
    /// A fresh or expired window admits the event with count 1; otherwise
    /// the count increments while strictly under `limit.max_events`, and the
    /// event is rejected without incrementing once the limit is reached.
    pub fn check(
        &self,
        connection_id: u64,
        kind: EventKind,
        limit: EventLimit,
        now: I,
    ) -> RateDecision {
        let mut entry = self
            .windows
            .entry((connection_id, kind))
            .or_insert(FixedWindow { started: now, count: 0 });
        let window = entry.value_mut();

        let elapsed = now - window.started;
        if elapsed >= limit.window {
            window.started = now;
            window.count = 1;
            return RateDecision::Allowed;
        }

        if window.count < limit.max_events {
            window.count += 1;
            return RateDecision::Allowed;
        }

        RateDecision::Limited { retry_after: limit.window - elapsed }
    }

    /// Boolean form of [`Self::check`].
    pub fn allow(&self, connection_id: u64, kind: EventKind, limit: EventLimit, now: I) -> bool {
        self.check(connection_id, kind, limit, now).is_allowed()
    }

    /// Drop all windows belonging to a connection (disconnect hook).
    pub fn forget(&self, connection_id: u64) {
        self.windows.retain(|(conn, _), _| *conn != connection_id);
    }

    /// Number of live windows, across all connections.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

impl<I> Default for RateLimiter<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}
