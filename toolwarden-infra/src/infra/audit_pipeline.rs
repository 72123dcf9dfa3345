//! Fan-out and buffering for audit events.
//!
//! [`CompositeBackend`] writes one event to every attached backend and keeps
//! going when one of them fails. [`AuditPipeline`] puts a queue and a
//! dedicated writer thread in front of a backend so callers never wait on
//! storage. Events queued before [`AuditPipeline::shutdown`] are always
//! written.

use crate::infra::contracts::{AuditBackend, AuditError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use toolwarden_tools::{AuditEvent, AuditSink};
use tracing::{debug, error, warn};

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

#[derive(Default)]
pub struct CompositeBackend {
    backends: Vec<Arc<dyn AuditBackend>>,
}

impl CompositeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn AuditBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn push(&mut self, backend: Arc<dyn AuditBackend>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl AuditBackend for CompositeBackend {
    fn name(&self) -> &str {
        "composite"
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut failed = 0;
        for backend in &self.backends {
            if let Err(e) = backend.persist(event) {
                failed += 1;
                error!(
                    target: "toolwarden::audit",
                    backend = backend.name(),
                    correlation_id = %event.correlation_id,
                    "Audit backend failed to persist {} event: {}",
                    event.event_type,
                    e
                );
            }
        }
        if failed > 0 {
            return Err(AuditError::Partial {
                failed,
                total: self.backends.len(),
            });
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut failed = 0;
        for backend in &self.backends {
            if let Err(e) = backend.flush() {
                failed += 1;
                error!(target: "toolwarden::audit", backend = backend.name(), "Audit flush failed: {}", e);
            }
        }
        if failed > 0 {
            return Err(AuditError::Partial {
                failed,
                total: self.backends.len(),
            });
        }
        Ok(())
    }
}

impl AuditSink for CompositeBackend {
    fn log(&self, event: AuditEvent) {
        // Per-backend failures are already reported by persist.
        let _ = self.persist(&event);
    }
}

enum Message {
    Event(AuditEvent),
    Flush(oneshot::Sender<()>),
}

pub struct AuditPipeline {
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    backend: Arc<dyn AuditBackend>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
}

impl AuditPipeline {
    pub fn new(backend: Arc<dyn AuditBackend>, capacity: usize) -> Result<Self, AuditError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_backend = backend.clone();
        let worker_pending = pending.clone();
        let worker = std::thread::Builder::new()
            .name("toolwarden-audit".to_string())
            .spawn(move || {
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Event(event) => {
                            write_event(worker_backend.as_ref(), &event);
                            worker_pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        Message::Flush(ack) => {
                            flush_backend(worker_backend.as_ref());
                            let _ = ack.send(());
                        }
                    }
                }
                flush_backend(worker_backend.as_ref());
                debug!("Audit writer stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            backend,
            pending,
            capacity,
        })
    }

    /// Events accepted but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Wait until everything queued so far has reached the backend.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        let queued = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Message::Flush(ack)).is_ok(),
            None => false,
        };
        if queued {
            let _ = done.await;
        } else {
            flush_backend(self.backend.as_ref());
        }
    }

    /// Stop accepting queued writes, drain the queue and join the writer.
    /// Events logged afterwards are written synchronously.
    pub async fn shutdown(&self) {
        let worker = self.close();
        if let Some(worker) = worker {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!(target: "toolwarden::audit", "Audit writer did not shut down cleanly");
            }
        }
    }

    fn close(&self) -> Option<JoinHandle<()>> {
        self.sender.lock().take();
        self.worker.lock().take()
    }
}

impl AuditSink for AuditPipeline {
    fn log(&self, event: AuditEvent) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                match sender.send(Message::Event(event)) {
                    Ok(()) => None,
                    Err(mpsc::error::SendError(message)) => {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        Some(message)
                    }
                }
            }
            None => Some(Message::Event(event)),
        };

        if let Some(Message::Event(event)) = rejected {
            write_event(self.backend.as_ref(), &event);
            return;
        }

        let pending = self.pending();
        if pending > self.capacity {
            warn!(target: "toolwarden::audit", "Audit queue above capacity: {} pending", pending);
        }
    }
}

impl Drop for AuditPipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.close() {
            let _ = worker.join();
        }
    }
}

fn write_event(backend: &dyn AuditBackend, event: &AuditEvent) {
    if let Err(e) = backend.persist(event) {
        error!(
            target: "toolwarden::audit",
            backend = backend.name(),
            "Failed to persist {} event for {}: {}",
            event.event_type,
            event.tool_name,
            e
        );
    }
}

fn flush_backend(backend: &dyn AuditBackend) {
    if let Err(e) = backend.flush() {
        error!(target: "toolwarden::audit", backend = backend.name(), "Audit flush failed: {}", e);
    }
}
