use crate::infra::contracts::{AuditBackend, AuditError};
use toolwarden_tools::AuditEvent;

/// Emits each event as a structured `tracing` event on the
/// `toolwarden::audit::event` target, for log aggregation pipelines.
#[derive(Debug, Default)]
pub struct TracingAuditBackend;

impl TracingAuditBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AuditBackend for TracingAuditBackend {
    fn name(&self) -> &str {
        "tracing"
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let line = event.to_json_line()?;
        tracing::info!(
            target: "toolwarden::audit::event",
            event_type = event.event_type.as_str(),
            tool = %event.tool_name,
            session = %event.session_id,
            correlation_id = %event.correlation_id,
            audit = %line,
            "audit event"
        );
        Ok(())
    }
}
