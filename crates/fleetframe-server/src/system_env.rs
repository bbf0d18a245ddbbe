//! Production environment using system time and RNG.
//!
//! `SystemEnv` backs the dispatcher with real resources: monotonic system
//! time for timeouts and rate windows, wall-clock time for timestamps and
//! surge pricing, tokio sleep, and OS cryptographic randomness for
//! connection ids. Production behavior is therefore non-deterministic;
//! tests use seeded/virtual environments instead.

use std::time::Duration;

use fleetframe_core::Environment;

/// Production environment: system clocks and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Intentional - a server that cannot generate
/// unpredictable connection ids should not keep running - and extremely
/// rare (indicates OS-level breakage).
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch")
            .as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
