//! Environment abstraction for deterministic testing.
//!
//! Decouples dispatch logic from system resources (time, randomness). Tests
//! use a virtual clock and seeded identifiers; production uses real system
//! resources. Monotonic time drives timeouts and rate windows; wall-clock
//! time stamps presence records, broadcasts, and fare surge decisions.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `wall_clock_ms()` is Unix epoch milliseconds and never decreases within
///   one execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific monotonic instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time as Unix epoch milliseconds.
    fn wall_clock_ms(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// The only async method in the trait; used by runtime code (tick loops),
    /// never by dispatch logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`, used for connection ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
