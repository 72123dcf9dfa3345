use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("Store timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for DistributedError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                DistributedError::Timeout(e.to_string())
            }
            _ => DistributedError::Storage(e.to_string()),
        }
    }
}

/// At most `limit` admissions in any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub limit: u32,
    pub window: Duration,
}

impl RateWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Exceeded { retry_after: Duration },
}

/// Sliding-log rate accounting shared by every process serving the same
/// clients.
///
/// Implementations must check every window and record the hit as a single
/// atomic step, so concurrent callers for one key can never both observe
/// spare capacity for the last slot. A rejected attempt is not recorded.
///
/// Implementations:
/// - In-memory: single process only, for tests and embedded use
/// - SQLite: one database file shared by every process on the host
pub trait RateLimitStore: Send + Sync {
    fn try_acquire(
        &self,
        key: &str,
        windows: &[RateWindow],
        now_ms: u64,
    ) -> Result<Admission, DistributedError>;

    /// Drop hits recorded before `older_than_ms`. Returns the number removed.
    fn purge_expired(&self, older_than_ms: u64) -> Result<usize, DistributedError>;
}

/// Evaluate `windows` against a sorted hit log. Shared by the store
/// implementations that keep the log in process.
pub(crate) fn evaluate_windows(hits: &[u64], windows: &[RateWindow], now_ms: u64) -> Admission {
    let mut remaining = u32::MAX;
    let mut retry_after: Option<u64> = None;

    for window in windows {
        let window_ms = window.window_ms();
        let start = now_ms.saturating_sub(window_ms);
        let first = hits.partition_point(|&hit| hit <= start);
        let count = (hits.len() - first) as u64;
        let limit = u64::from(window.limit);

        if count >= limit {
            let wait = if limit == 0 {
                window_ms
            } else {
                let blocking_hit = hits[first + (count - limit) as usize];
                (blocking_hit + window_ms).saturating_sub(now_ms)
            };
            retry_after = Some(retry_after.map_or(wait, |current| current.max(wait)));
        } else {
            remaining = remaining.min((limit - count - 1) as u32);
        }
    }

    match retry_after {
        Some(wait) => Admission::Exceeded {
            retry_after: Duration::from_millis(wait.max(1)),
        },
        None => Admission::Admitted { remaining },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_counts_only_trailing_window() {
        let windows = [RateWindow::new(2, Duration::from_millis(1000))];
        assert_eq!(
            evaluate_windows(&[100, 200], &windows, 1150),
            Admission::Admitted { remaining: 0 }
        );
        assert_eq!(
            evaluate_windows(&[500, 600], &windows, 1200),
            Admission::Exceeded {
                retry_after: Duration::from_millis(300)
            }
        );
    }

    #[test]
    fn test_evaluate_takes_strictest_window() {
        let windows = [
            RateWindow::new(10, Duration::from_secs(1)),
            RateWindow::new(3, Duration::from_secs(60)),
        ];
        assert_eq!(
            evaluate_windows(&[1_000, 2_000], &windows, 10_000),
            Admission::Admitted { remaining: 0 }
        );
        assert!(matches!(
            evaluate_windows(&[1_000, 2_000, 3_000], &windows, 10_000),
            Admission::Exceeded { retry_after } if retry_after == Duration::from_millis(51_000)
        ));
    }

    #[test]
    fn test_zero_limit_always_exceeds() {
        let windows = [RateWindow::new(0, Duration::from_secs(1))];
        assert!(matches!(
            evaluate_windows(&[], &windows, 0),
            Admission::Exceeded { .. }
        ));
    }
}
