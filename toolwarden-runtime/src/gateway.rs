//! Server-boundary gateway: admission, session resolution and per-session
//! serialization of request handlers.

use crate::interfaces::{RuntimeError, SessionStore};
use crate::metrics;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use toolwarden::infra::lock_manager::LockManager;
use toolwarden::infra::rate_limiter::{RateDecision, RateLimiter};
use tracing::{debug, info, warn};

/// Resolve session key from user_id and agent_id.
///
/// # Returns
/// Session key in format "agent_id:user_id"
///
/// # Errors
/// Returns error if user_id or agent_id is empty
pub fn resolve_session(user_id: &str, agent_id: &str) -> Result<String, RuntimeError> {
    if user_id.is_empty() || agent_id.is_empty() {
        return Err(RuntimeError::SessionError(
            "user_id and agent_id must be non-empty".to_string(),
        ));
    }

    Ok(format!("{}:{}", agent_id, user_id))
}

/// Identity of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    /// Stable per-client identity used for rate limiting.
    pub client_key: String,
    pub agent_id: String,
    pub user_id: String,
}

impl GatewayRequest {
    pub fn new(
        client_key: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Admits requests and runs their handlers under the session lock.
///
/// The handler receives the session key and the loaded history and returns
/// the history to persist. Load, handler and save all happen while the
/// lock is held, so two requests for one session never interleave.
pub struct SessionGateway {
    limiter: Arc<RateLimiter>,
    locks: LockManager,
    store: Arc<dyn SessionStore>,
}

impl SessionGateway {
    pub fn new(limiter: Arc<RateLimiter>, locks: LockManager, store: Arc<dyn SessionStore>) -> Self {
        Self {
            limiter,
            locks,
            store,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Rate-limit check for `client_key`. Store access runs off the async
    /// executor; a failed check rejects.
    pub async fn admit(&self, client_key: &str) -> Result<u32, RuntimeError> {
        let limiter = self.limiter.clone();
        let key = client_key.to_string();
        let decision = tokio::task::spawn_blocking(move || limiter.try_acquire(&key))
            .await
            .unwrap_or_else(|e| {
                warn!("Rate limit check aborted for {}: {}", client_key, e);
                RateDecision::Rejected {
                    retry_after: std::time::Duration::from_secs(1),
                }
            });

        match decision {
            RateDecision::Allowed { remaining } => Ok(remaining),
            RateDecision::Rejected { retry_after } => {
                metrics::increment_rate_limited();
                Err(RuntimeError::RateLimited {
                    client_key: client_key.to_string(),
                    retry_after,
                })
            }
        }
    }

    pub async fn handle<F, Fut>(
        &self,
        request: &GatewayRequest,
        handler: F,
    ) -> Result<Vec<Value>, RuntimeError>
    where
        F: FnOnce(String, Vec<Value>) -> Fut,
        Fut: Future<Output = Result<Vec<Value>, RuntimeError>>,
    {
        let _timer = metrics::MetricTimer::new("gateway_request_latency");
        self.handle_inner(request, handler).await
    }

    async fn handle_inner<F, Fut>(
        &self,
        request: &GatewayRequest,
        handler: F,
    ) -> Result<Vec<Value>, RuntimeError>
    where
        F: FnOnce(String, Vec<Value>) -> Fut,
        Fut: Future<Output = Result<Vec<Value>, RuntimeError>>,
    {
        self.admit(&request.client_key).await?;
        let session_key = resolve_session(&request.user_id, &request.agent_id)?;

        let (lock, lock_metrics) = self.locks.acquire_with_metrics(&session_key).await;
        metrics::record_lock_wait(lock_metrics.wait_time.as_secs_f64() * 1000.0);
        let _lock = lock.map_err(|e| {
            metrics::increment_lock_timeouts();
            warn!("Could not lock session {}: {}", session_key, e);
            e
        })?;
        debug!(
            "Session {} locked after {:?}",
            session_key, lock_metrics.wait_time
        );

        let history = self.store.load(&session_key).await?;
        let updated = handler(session_key.clone(), history).await?;
        self.store.save(&session_key, &updated).await?;

        info!("Handled request for {} ({} entries)", session_key, updated.len());
        Ok(updated)
    }
}
