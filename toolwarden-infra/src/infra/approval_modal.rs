use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use toolwarden_tools::{ApprovalError, ApprovalProvider, ApprovalRequest, ApprovalResponse};
use tracing::debug;
use uuid::Uuid;

struct PendingApproval {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResponse>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingApproval>>>;

/// Parks each request until a UI event resolves it by id.
///
/// New requests are announced on the receiver returned by [`new`]; the UI
/// answers through [`resolve`].
///
/// [`new`]: ModalApprovalProvider::new
/// [`resolve`]: ModalApprovalProvider::resolve
pub struct ModalApprovalProvider {
    pending: PendingMap,
    announcements: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ModalApprovalProvider {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (announcements, receiver) = mpsc::unbounded_channel();
        (
            Self {
                pending: Arc::new(Mutex::new(HashMap::new())),
                announcements,
            },
            receiver,
        )
    }

    /// Answer a pending request. Returns false if it is no longer pending.
    pub fn resolve(&self, id: Uuid, response: ApprovalResponse) -> bool {
        match self.pending.lock().remove(&id) {
            Some(entry) => entry.responder.send(response).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Close every open modal; waiting requests fail with `Closed`.
    pub fn dismiss_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }
}

/// Removes the entry if the waiting request is abandoned.
struct PendingGuard {
    pending: PendingMap,
    id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            debug!("Dropped unanswered approval {}", self.id);
        }
    }
}

#[async_trait]
impl ApprovalProvider for ModalApprovalProvider {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApprovalError> {
        let (responder, response) = oneshot::channel();
        self.pending.lock().insert(
            request.id,
            PendingApproval {
                request: request.clone(),
                responder,
            },
        );
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: request.id,
        };

        if self.announcements.send(request.clone()).is_err() {
            return Err(ApprovalError::Unavailable("no UI is listening".into()));
        }

        response.await.map_err(|_| ApprovalError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolwarden_tools::RiskTier;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new("file.write", json!({"path": "a"}), RiskTier::Caution, "s")
    }

    #[tokio::test]
    async fn test_ui_resolves_by_id() {
        let (provider, mut ui) = ModalApprovalProvider::new();
        let provider = Arc::new(provider);

        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.request_approval(&request()).await })
        };

        let shown = ui.recv().await.unwrap();
        assert_eq!(provider.pending_count(), 1);
        assert!(provider.resolve(shown.id, ApprovalResponse::approve()));
        assert!(waiter.await.unwrap().unwrap().approved);
        assert_eq!(provider.pending_count(), 0);
        assert!(!provider.resolve(shown.id, ApprovalResponse::approve()));
    }

    #[tokio::test]
    async fn test_dismiss_closes_waiters() {
        let (provider, mut ui) = ModalApprovalProvider::new();
        let provider = Arc::new(provider);
        let waiter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.request_approval(&request()).await })
        };
        ui.recv().await.unwrap();
        assert_eq!(provider.dismiss_all(), 1);
        assert_eq!(waiter.await.unwrap(), Err(ApprovalError::Closed));
    }

    #[tokio::test]
    async fn test_abandoned_request_is_removed() {
        let (provider, _ui) = ModalApprovalProvider::new();
        let request = request();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            provider.request_approval(&request),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_no_ui_is_unavailable() {
        let (provider, ui) = ModalApprovalProvider::new();
        drop(ui);
        let result = provider.request_approval(&request()).await;
        assert!(matches!(result, Err(ApprovalError::Unavailable(_))));
        assert_eq!(provider.pending_count(), 0);
    }
}
