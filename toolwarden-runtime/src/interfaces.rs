//! Abstract interfaces for runtime dependencies.

use crate::guard_config::ConfigError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use toolwarden::infra::lock_manager::LockError;
use toolwarden_tools::ToolError;

/// Runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Lock error: {0}")]
    LockError(#[from] LockError),

    #[error("Tool error: {0}")]
    ToolError(#[from] ToolError),

    #[error("Rate limited: {client_key}, retry after {retry_after:?}")]
    RateLimited {
        client_key: String,
        retry_after: Duration,
    },

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Seconds a client should wait before retrying, if this was a rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RuntimeError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Session persistence interface.
///
/// Only called inside the session lock, so implementations see at most
/// one load/save pair per session at a time.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load history for a session. Unknown sessions load as empty.
    async fn load(&self, session_key: &str) -> Result<Vec<Value>, RuntimeError>;

    /// Replace history for a session.
    async fn save(&self, session_key: &str, history: &[Value]) -> Result<(), RuntimeError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use toolwarden_tools::DenialReason;

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::SessionError("test error".to_string());
        assert_eq!(err.to_string(), "Session error: test error");

        let err: RuntimeError = LockError::Timeout("agent:user".into()).into();
        assert_eq!(err.to_string(), "Lock error: Lock timeout for session: agent:user");
    }

    #[test]
    fn test_tool_denial_keeps_reason() {
        let err: RuntimeError = ToolError::Denied(DenialReason::TimedOut { after_ms: 50 }).into();
        assert!(err.to_string().contains("no approval response within 50ms"));
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = RuntimeError::RateLimited {
            client_key: "c".into(),
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(RuntimeError::SessionError("x".into()).retry_after(), None);
    }
}
