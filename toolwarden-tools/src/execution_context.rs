use tokio_util::sync::CancellationToken;

/// Caller-side identity of the session an invocation belongs to.
///
/// The cancellation token is tripped when the owning connection goes away;
/// pending approvals resolve to denial and in-flight dispatches are aborted.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user: Option<String>,
    pub cancellation: CancellationToken,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Signal that the owning connection closed.
    pub fn disconnect(&self) {
        self.cancellation.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Handed to a tool implementation once the call has been authorized.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_key: String,
    pub timeout_ms: u64,
    pub correlation_id: String,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(session_key: String, timeout_ms: u64) -> Self {
        Self {
            session_key,
            timeout_ms,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}
