use cirrus_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the tracing pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = "audit.event",
                audit_event = %event.event_type,
                audit_id = %event.event_id,
                category = ?event.category,
                correlation_id = %event.correlation_id,
                session_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = "audit.event",
                audit_event = %event.event_type,
                audit_id = %event.event_id,
                category = ?event.category,
                outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                session_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit"
            ),
        }
    }
}
