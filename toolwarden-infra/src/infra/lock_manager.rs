use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_IDLE_RETENTION: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock timeout for session: {0}")]
    Timeout(String),
}

struct LockSlot {
    mutex: Arc<AsyncMutex<()>>,
    last_released: Mutex<Instant>,
}

impl LockSlot {
    fn new() -> Self {
        Self {
            mutex: Arc::new(AsyncMutex::new(())),
            last_released: Mutex::new(Instant::now()),
        }
    }
}

type LockTable = Mutex<HashMap<String, Arc<LockSlot>>>;

/// Keyed session locks. Slots are created on first use and evicted once
/// idle past the retention window; a held or awaited slot is never evicted.
#[derive(Clone)]
pub struct LockManager {
    locks: Arc<LockTable>,
    timeout: Duration,
    idle_retention: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LockMetrics {
    pub wait_time: Duration,
    pub acquired: bool,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            idle_retention: DEFAULT_IDLE_RETENTION,
        }
    }

    pub fn with_idle_retention(mut self, idle_retention: Duration) -> Self {
        self.idle_retention = idle_retention;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn acquire(&self, session_key: &str) -> Result<SessionLock, LockError> {
        let start = Instant::now();

        let slot = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_key.to_string())
                .or_insert_with(|| Arc::new(LockSlot::new()))
                .clone()
        };

        let guard = tokio::time::timeout(self.timeout, slot.mutex.clone().lock_owned())
            .await
            .map_err(|_| LockError::Timeout(session_key.to_string()))?;

        Ok(SessionLock {
            slot,
            _guard: guard,
            session_key: session_key.to_string(),
            wait_time: start.elapsed(),
        })
    }

    pub async fn acquire_with_metrics(
        &self,
        session_key: &str,
    ) -> (Result<SessionLock, LockError>, LockMetrics) {
        let start = Instant::now();
        let result = self.acquire(session_key).await;
        let metrics = LockMetrics {
            wait_time: start.elapsed(),
            acquired: result.is_ok(),
        };
        (result, metrics)
    }

    /// Run `f` while holding the lock for `session_key`.
    pub async fn with_session_lock<F, Fut, T>(&self, session_key: &str, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _lock = self.acquire(session_key).await?;
        Ok(f().await)
    }

    /// Number of sessions with a live lock slot.
    pub fn active_sessions(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove slots idle for longer than the retention window. Returns the
    /// number evicted.
    pub fn evict_idle(&self) -> usize {
        evict_idle_slots(&self.locks, self.idle_retention)
    }

    /// Periodically evict idle slots until the manager is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let table: Weak<LockTable> = Arc::downgrade(&self.locks);
        let retention = self.idle_retention;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(table) = table.upgrade() else {
                    break;
                };
                let evicted = evict_idle_slots(&table, retention);
                if evicted > 0 {
                    debug!("Evicted {} idle session locks", evicted);
                }
            }
        })
    }
}

fn evict_idle_slots(table: &LockTable, retention: Duration) -> usize {
    let now = Instant::now();
    let mut locks = table.lock();
    let before = locks.len();
    locks.retain(|_, slot| {
        // Anyone holding or waiting on the slot owns a clone of it; the clone
        // is taken under this table lock, so the count cannot race.
        let in_use = Arc::strong_count(slot) > 1 || slot.mutex.try_lock().is_err();
        let idle_for = now.saturating_duration_since(*slot.last_released.lock());
        in_use || idle_for < retention
    });
    before - locks.len()
}

pub struct SessionLock {
    slot: Arc<LockSlot>,
    _guard: OwnedMutexGuard<()>,
    session_key: String,
    wait_time: Duration,
}

impl SessionLock {
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        *self.slot.last_released.lock() = Instant::now();
    }
}
