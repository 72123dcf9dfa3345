use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use toolwarden_tools::{ApprovalError, ApprovalProvider, ApprovalRequest, ApprovalResponse};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Wire messages, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    ApprovalRequest {
        request: ApprovalRequest,
    },
    ApprovalResponse {
        id: Uuid,
        approved: bool,
        #[serde(default)]
        reason: Option<String>,
    },
}

type Waiters = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ApprovalResponse>>>>;

/// Sends approval requests over a socket and waits for the matching
/// response by request id.
pub struct RemoteApprovalProvider {
    writer: AsyncMutex<Box<dyn AsyncWrite + Send + Unpin>>,
    waiters: Waiters,
    timeout: Duration,
}

impl RemoteApprovalProvider {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: AsyncMutex::new(Box::new(writer)),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Route one inbound message. Returns true if it resolved a waiter.
    pub fn handle_message(&self, message: RemoteMessage) -> bool {
        deliver(&self.waiters, message)
    }

    /// Read responses from `reader` until it closes. Waiters still pending
    /// at end of stream fail with `Closed`.
    pub fn spawn_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let waiters = self.waiters.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RemoteMessage>(&line) {
                            Ok(message) => {
                                deliver(&waiters, message);
                            }
                            Err(e) => warn!("Ignoring malformed approval message: {}", e),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Approval connection failed: {}", e);
                        break;
                    }
                }
            }
            waiters.lock().clear();
            debug!("Approval reader stopped");
        })
    }

    async fn send(&self, message: &RemoteMessage) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await
    }
}

fn deliver(waiters: &Waiters, message: RemoteMessage) -> bool {
    match message {
        RemoteMessage::ApprovalResponse {
            id,
            approved,
            reason,
        } => match waiters.lock().remove(&id) {
            Some(waiter) => waiter.send(ApprovalResponse { approved, reason }).is_ok(),
            None => {
                debug!("No pending approval {}", id);
                false
            }
        },
        RemoteMessage::ApprovalRequest { request } => {
            warn!("Unexpected approval request {} from remote", request.id);
            false
        }
    }
}

struct WaiterGuard {
    waiters: Waiters,
    id: Uuid,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.waiters.lock().remove(&self.id);
    }
}

#[async_trait]
impl ApprovalProvider for RemoteApprovalProvider {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApprovalError> {
        let (waiter, response) = oneshot::channel();
        self.waiters.lock().insert(request.id, waiter);
        let _guard = WaiterGuard {
            waiters: self.waiters.clone(),
            id: request.id,
        };

        let message = RemoteMessage::ApprovalRequest {
            request: request.clone(),
        };
        self.send(&message)
            .await
            .map_err(|e| ApprovalError::Unavailable(e.to_string()))?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ApprovalError::Closed),
            Err(_) => Err(ApprovalError::TimedOut(self.timeout)),
        }
    }
}
