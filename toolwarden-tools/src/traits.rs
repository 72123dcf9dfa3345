use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::audit::AuditEvent;
use crate::error::ApprovalError;
use async_trait::async_trait;

/// Something that can resolve a pending approval: a person at a terminal,
/// a UI modal, a remote approver, or an automated judge.
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApprovalError>;
}

/// Receiver of audit events.
///
/// Fire-and-forget: implementations must not block the caller on slow
/// storage and must never fail the invocation that produced the event.
pub trait AuditSink: Send + Sync {
    fn log(&self, event: AuditEvent);
}
