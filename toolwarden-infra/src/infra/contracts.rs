use thiserror::Error;
use toolwarden_tools::AuditEvent;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Audit backend closed")]
    Closed,

    #[error("{failed} of {total} audit backends failed")]
    Partial { failed: usize, total: usize },
}

/// A durable destination for audit events.
///
/// Backends are synchronous; the pipeline calls them off the request path.
pub trait AuditBackend: Send + Sync {
    fn name(&self) -> &str;

    fn persist(&self, event: &AuditEvent) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}
