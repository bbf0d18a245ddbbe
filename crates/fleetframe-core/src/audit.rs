//! Audit log abstraction.
//!
//! Security and lifecycle events go to an external audit collaborator.
//! Recording is fire-and-forget from the core's perspective: the trait
//! methods are infallible and implementations swallow their own failures,
//! because a broken audit pipeline must never block or fail the event that
//! triggered it.

use std::sync::{Arc, Mutex};

/// Kinds of security events the core reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    /// A caller tried to publish location for a delivery it does not own
    UnauthorizedLocationUpdate,
    /// A caller tried to track a delivery it is not party to
    UnauthorizedTracking,
}

impl SecurityEventKind {
    /// Stable name for log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnauthorizedLocationUpdate => "unauthorized-location-update",
            Self::UnauthorizedTracking => "unauthorized-tracking",
        }
    }
}

/// Severity attached to a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational
    Info,
    /// Suspicious but possibly accidental
    Warning,
    /// Deliberate-looking access violation
    Critical,
}

/// Connection lifecycle transitions worth auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Connection authenticated and registered
    Connected,
    /// Connection cleaned up
    Disconnected,
}

impl LifecycleAction {
    /// Stable name for log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Audit operations the core requires from the platform.
pub trait AuditLog: Clone + Send + Sync + 'static {
    /// Record a security event (access violation, spoofing attempt).
    fn security_event(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        actor_id: u64,
        context: &str,
    );

    /// Record a connection lifecycle event.
    fn lifecycle_event(&self, actor_id: u64, action: LifecycleAction, context: &str);
}

/// A captured audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRecord {
    /// Captured security event
    Security {
        /// Event kind
        kind: SecurityEventKind,
        /// Severity
        severity: Severity,
        /// Acting user
        actor_id: u64,
        /// Free-form context
        context: String,
    },
    /// Captured lifecycle event
    Lifecycle {
        /// Acting user
        actor_id: u64,
        /// Transition
        action: LifecycleAction,
        /// Free-form context
        context: String,
    },
}

/// Audit log that records events in memory, for tests and simulation.
#[derive(Clone, Default)]
pub struct RecordingAudit {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl RecordingAudit {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured records, in order.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("mutex poisoned").clone()
    }

    /// Captured security events only.
    #[must_use]
    pub fn security_events(&self) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| matches!(r, AuditRecord::Security { .. }))
            .collect()
    }

    /// Captured lifecycle events only.
    #[must_use]
    pub fn lifecycle_events(&self) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| matches!(r, AuditRecord::Lifecycle { .. }))
            .collect()
    }
}

impl AuditLog for RecordingAudit {
    #[allow(clippy::expect_used)]
    fn security_event(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        actor_id: u64,
        context: &str,
    ) {
        self.records.lock().expect("mutex poisoned").push(AuditRecord::Security {
            kind,
            severity,
            actor_id,
            context: context.to_string(),
        });
    }

    #[allow(clippy::expect_used)]
    fn lifecycle_event(&self, actor_id: u64, action: LifecycleAction, context: &str) {
        self.records.lock().expect("mutex poisoned").push(AuditRecord::Lifecycle {
            actor_id,
            action,
            context: context.to_string(),
        });
    }
}

impl std::fmt::Debug for RecordingAudit {
    #[allow(clippy::expect_used)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingAudit")
            .field("records", &self.records.lock().expect("mutex poisoned").len())
            .finish()
    }
}
