use crate::infra::distributed::*;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Process-local rate limit store.
///
/// Every instance enforces its own budget, so running N processes against
/// N of these multiplies the effective limit by N. Use it for a single
/// process or in tests; share [`SqliteRateLimitStore`] otherwise.
///
/// [`SqliteRateLimitStore`]: crate::infra::rate_store_sqlite::SqliteRateLimitStore
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    hits: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().len()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn try_acquire(
        &self,
        key: &str,
        windows: &[RateWindow],
        now_ms: u64,
    ) -> Result<Admission, DistributedError> {
        let longest = windows.iter().map(RateWindow::window_ms).max().unwrap_or(0);
        let mut table = self.hits.lock();
        let log = table.entry(key.to_string()).or_default();

        let horizon = now_ms.saturating_sub(longest);
        while log.front().is_some_and(|&hit| hit <= horizon) {
            log.pop_front();
        }

        let admission = evaluate_windows(log.make_contiguous(), windows, now_ms);
        if let Admission::Admitted { .. } = admission {
            let at = log.partition_point(|&hit| hit <= now_ms);
            log.insert(at, now_ms);
        }
        Ok(admission)
    }

    fn purge_expired(&self, older_than_ms: u64) -> Result<usize, DistributedError> {
        let mut table = self.hits.lock();
        let mut removed = 0;
        table.retain(|_, log| {
            while log.front().is_some_and(|&hit| hit < older_than_ms) {
                log.pop_front();
                removed += 1;
            }
            !log.is_empty()
        });
        Ok(removed)
    }
}
