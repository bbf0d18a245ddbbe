//! Tracing-backed audit log.
//!
//! The development/default audit sink: security and lifecycle events become
//! structured tracing events. A production deployment would swap in an
//! implementation that ships them to the platform's audit pipeline; either
//! way the core treats recording as fire-and-forget.

use fleetframe_core::{AuditLog, LifecycleAction, SecurityEventKind, Severity};

/// Audit log that emits structured `tracing` events.
#[derive(Clone, Copy, Default)]
pub struct TracingAudit;

impl TracingAudit {
    /// Create a new tracing audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AuditLog for TracingAudit {
    fn security_event(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        actor_id: u64,
        context: &str,
    ) {
        match severity {
            Severity::Critical => tracing::error!(
                target: "fleetframe::audit",
                kind = kind.as_str(),
                actor_id,
                context,
                "security event"
            ),
            Severity::Warning => tracing::warn!(
                target: "fleetframe::audit",
                kind = kind.as_str(),
                actor_id,
                context,
                "security event"
            ),
            Severity::Info => tracing::info!(
                target: "fleetframe::audit",
                kind = kind.as_str(),
                actor_id,
                context,
                "security event"
            ),
        }
    }

    fn lifecycle_event(&self, actor_id: u64, action: LifecycleAction, context: &str) {
        tracing::info!(
            target: "fleetframe::audit",
            action = action.as_str(),
            actor_id,
            context,
            "lifecycle event"
        );
    }
}
