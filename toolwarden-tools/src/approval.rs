//! Approval coordination.
//!
//! The [`ApprovalCoordinator`] hands an [`ApprovalRequest`] to whatever
//! [`ApprovalProvider`] the caller supplies and turns every way that can go
//! wrong into a denial:
//!
//! - no answer before the timeout resolves to `DenialReason::TimedOut`
//! - the owning session disconnecting resolves to `DenialReason::Cancelled`
//! - a broken channel resolves to `DenialReason::ChannelUnavailable`
//!
//! In [`ApprovalMode::OncePerSession`] a granted approval is remembered for
//! `(session, tool)` until [`ApprovalCoordinator::end_session`] is called.

use crate::error::{ApprovalError, DenialReason};
use crate::traits::ApprovalProvider;
use crate::types::RiskTier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub risk_tier: RiskTier,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        risk_tier: RiskTier,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            arguments,
            risk_tier,
            session_id: session_id.into(),
            created_at: Utc::now(),
        }
    }

    /// One-line description for prompts.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] with input {}",
            self.tool_name,
            self.risk_tier,
            serde_json::to_string(&self.arguments).unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    EveryCall,
    OncePerSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved {
        cached: bool,
        reason: Option<String>,
    },
    Denied(DenialReason),
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved { .. })
    }
}

pub struct ApprovalCoordinator {
    timeout: Duration,
    mode: ApprovalMode,
    session_cache: Mutex<HashMap<(String, String), ApprovalResponse>>,
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_TIMEOUT, ApprovalMode::EveryCall)
    }
}

impl ApprovalCoordinator {
    pub fn new(timeout: Duration, mode: ApprovalMode) -> Self {
        Self {
            timeout,
            mode,
            session_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// A remembered approval for this session and tool, if caching is on.
    pub fn cached(&self, session_id: &str, tool_name: &str) -> Option<ApprovalResponse> {
        if self.mode != ApprovalMode::OncePerSession {
            return None;
        }
        self.session_cache
            .lock()
            .get(&(session_id.to_string(), tool_name.to_string()))
            .cloned()
    }

    pub async fn request_approval(
        &self,
        request: ApprovalRequest,
        provider: &dyn ApprovalProvider,
        cancellation: &CancellationToken,
    ) -> ApprovalOutcome {
        self.request_approval_with_timeout(request, provider, cancellation, self.timeout)
            .await
    }

    pub async fn request_approval_with_timeout(
        &self,
        request: ApprovalRequest,
        provider: &dyn ApprovalProvider,
        cancellation: &CancellationToken,
        timeout: Duration,
    ) -> ApprovalOutcome {
        if let Some(response) = self.cached(&request.session_id, &request.tool_name) {
            return ApprovalOutcome::Approved {
                cached: true,
                reason: response.reason,
            };
        }

        if cancellation.is_cancelled() {
            return ApprovalOutcome::Denied(DenialReason::Cancelled);
        }

        info!(
            "Requesting approval {} for {} in session {}",
            request.id, request.tool_name, request.session_id
        );
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => ApprovalOutcome::Denied(DenialReason::Cancelled),
            result = tokio::time::timeout(timeout, provider.request_approval(&request)) => {
                match result {
                    Err(_) => ApprovalOutcome::Denied(DenialReason::TimedOut {
                        after_ms: timeout.as_millis() as u64,
                    }),
                    Ok(Err(ApprovalError::TimedOut(after))) => {
                        ApprovalOutcome::Denied(DenialReason::TimedOut {
                            after_ms: after.as_millis() as u64,
                        })
                    }
                    Ok(Err(e)) => ApprovalOutcome::Denied(DenialReason::ChannelUnavailable {
                        detail: e.to_string(),
                    }),
                    Ok(Ok(response)) if response.approved => {
                        self.remember(&request, &response);
                        ApprovalOutcome::Approved {
                            cached: false,
                            reason: response.reason,
                        }
                    }
                    Ok(Ok(response)) => ApprovalOutcome::Denied(DenialReason::Declined {
                        reason: response.reason,
                    }),
                }
            }
        };

        match &outcome {
            ApprovalOutcome::Approved { .. } => info!(
                "Approval {} granted after {}ms",
                request.id,
                started.elapsed().as_millis()
            ),
            ApprovalOutcome::Denied(reason) => {
                warn!("Approval {} denied: {}", request.id, reason)
            }
        }

        outcome
    }

    /// Drop every cached approval belonging to `session_id`.
    pub fn end_session(&self, session_id: &str) {
        self.session_cache
            .lock()
            .retain(|(session, _), _| session != session_id);
    }

    fn remember(&self, request: &ApprovalRequest, response: &ApprovalResponse) {
        if self.mode == ApprovalMode::OncePerSession {
            self.session_cache.lock().insert(
                (request.session_id.clone(), request.tool_name.clone()),
                response.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        response: Result<ApprovalResponse, ApprovalError>,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(response: Result<ApprovalResponse, ApprovalError>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ApprovalProvider for FixedProvider {
        async fn request_approval(
            &self,
            _request: &ApprovalRequest,
        ) -> Result<ApprovalResponse, ApprovalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    struct SilentProvider;

    #[async_trait]
    impl ApprovalProvider for SilentProvider {
        async fn request_approval(
            &self,
            _request: &ApprovalRequest,
        ) -> Result<ApprovalResponse, ApprovalError> {
            std::future::pending().await
        }
    }

    fn request(session: &str) -> ApprovalRequest {
        ApprovalRequest::new("shell.exec", json!({"command": "ls"}), RiskTier::Caution, session)
    }

    #[tokio::test]
    async fn test_explicit_approval() {
        let coordinator = ApprovalCoordinator::default();
        let provider = FixedProvider::new(Ok(ApprovalResponse::approve()));
        let outcome = coordinator
            .request_approval(request("s1"), &provider, &CancellationToken::new())
            .await;
        assert_eq!(outcome, ApprovalOutcome::Approved { cached: false, reason: None });
    }

    #[tokio::test]
    async fn test_explicit_denial_keeps_reason() {
        let coordinator = ApprovalCoordinator::default();
        let provider = FixedProvider::new(Ok(ApprovalResponse::deny("not now")));
        let outcome = coordinator
            .request_approval(request("s1"), &provider, &CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            ApprovalOutcome::Denied(DenialReason::Declined { reason: Some("not now".into()) })
        );
    }

    #[tokio::test]
    async fn test_timeout_denies() {
        let coordinator = ApprovalCoordinator::new(Duration::from_millis(50), ApprovalMode::EveryCall);
        let outcome = coordinator
            .request_approval(request("s1"), &SilentProvider, &CancellationToken::new())
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied(DenialReason::TimedOut { after_ms: 50 }));
    }

    #[tokio::test]
    async fn test_cancellation_denies_immediately() {
        let coordinator = ApprovalCoordinator::new(Duration::from_secs(60), ApprovalMode::EveryCall);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = coordinator
            .request_approval(request("s1"), &SilentProvider, &token)
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied(DenialReason::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_channel_error_denies() {
        let coordinator = ApprovalCoordinator::default();
        let provider = FixedProvider::new(Err(ApprovalError::Closed));
        let outcome = coordinator
            .request_approval(request("s1"), &provider, &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            ApprovalOutcome::Denied(DenialReason::ChannelUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_once_per_session_cache() {
        let coordinator = ApprovalCoordinator::new(Duration::from_secs(1), ApprovalMode::OncePerSession);
        let provider = FixedProvider::new(Ok(ApprovalResponse::approve()));
        let token = CancellationToken::new();

        coordinator.request_approval(request("s1"), &provider, &token).await;
        let second = coordinator.request_approval(request("s1"), &provider, &token).await;
        assert_eq!(second, ApprovalOutcome::Approved { cached: true, reason: None });
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // Other sessions never see the cached approval.
        coordinator.request_approval(request("s2"), &provider, &token).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        coordinator.end_session("s1");
        assert!(coordinator.cached("s1", "shell.exec").is_none());
        assert!(coordinator.cached("s2", "shell.exec").is_some());
    }

    #[test]
    fn test_denials_are_not_cached() {
        let coordinator = ApprovalCoordinator::new(Duration::from_secs(1), ApprovalMode::OncePerSession);
        let provider = FixedProvider::new(Ok(ApprovalResponse::deny("no")));
        tokio_test::block_on(coordinator.request_approval(
            request("s1"),
            &provider,
            &CancellationToken::new(),
        ));
        assert!(coordinator.cached("s1", "shell.exec").is_none());
    }

    #[test]
    fn test_every_call_mode_never_caches() {
        let coordinator = ApprovalCoordinator::default();
        coordinator.remember(&request("s1"), &ApprovalResponse::approve());
        assert!(coordinator.cached("s1", "shell.exec").is_none());
    }
}
