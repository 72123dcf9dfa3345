use crate::infra::distributed::{Admission, RateLimitStore, RateWindow};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{error, warn};

pub const DEFAULT_FAIL_CLOSED_RETRY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Invalid rate limit '{input}': {reason}")]
    InvalidWindow { input: String, reason: String },

    #[error("Rate limit exceeded for {key}, retry after {retry_after:?}")]
    Exceeded { key: String, retry_after: Duration },
}

impl FromStr for RateWindow {
    type Err = RateLimitError;

    /// Accepts `"N per unit"` and `"N/unit"` with unit second, minute, hour
    /// or day (singular, plural or abbreviated).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RateLimitError::InvalidWindow {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let normalized = s.trim().to_ascii_lowercase();
        let (count, unit) = if let Some((count, unit)) = normalized.split_once('/') {
            (count.trim(), unit.trim())
        } else if let Some((count, unit)) = normalized.split_once(" per ") {
            (count.trim(), unit.trim())
        } else {
            return Err(invalid("expected 'N per unit' or 'N/unit'"));
        };

        let limit: u32 = count.parse().map_err(|_| invalid("count is not a number"))?;
        let window = match unit {
            "s" | "sec" | "second" | "seconds" => Duration::from_secs(1),
            "m" | "min" | "minute" | "minutes" => Duration::from_secs(60),
            "h" | "hr" | "hour" | "hours" => Duration::from_secs(3600),
            "d" | "day" | "days" => Duration::from_secs(86_400),
            _ => return Err(invalid("unknown unit")),
        };
        Ok(RateWindow::new(limit, window))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Per-client admission control over one or more simultaneous windows.
///
/// A store failure rejects the request.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    windows: Vec<RateWindow>,
    fail_closed_retry: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, windows: Vec<RateWindow>) -> Self {
        Self {
            store,
            windows,
            fail_closed_retry: DEFAULT_FAIL_CLOSED_RETRY,
        }
    }

    /// Build from window strings such as `"60 per minute"`.
    pub fn parse<S: AsRef<str>>(
        store: Arc<dyn RateLimitStore>,
        windows: &[S],
    ) -> Result<Self, RateLimitError> {
        let windows = windows
            .iter()
            .map(|w| w.as_ref().parse())
            .collect::<Result<Vec<RateWindow>, _>>()?;
        Ok(Self::new(store, windows))
    }

    pub fn with_fail_closed_retry(mut self, retry_after: Duration) -> Self {
        self.fail_closed_retry = retry_after;
        self
    }

    pub fn windows(&self) -> &[RateWindow] {
        &self.windows
    }

    pub fn try_acquire(&self, client_key: &str) -> RateDecision {
        self.try_acquire_at(client_key, now_ms())
    }

    pub fn try_acquire_at(&self, client_key: &str, now_ms: u64) -> RateDecision {
        if self.windows.is_empty() {
            return RateDecision::Allowed {
                remaining: u32::MAX,
            };
        }

        match self.store.try_acquire(client_key, &self.windows, now_ms) {
            Ok(Admission::Admitted { remaining }) => RateDecision::Allowed { remaining },
            Ok(Admission::Exceeded { retry_after }) => {
                warn!("Rate limit exceeded for {}, retry after {:?}", client_key, retry_after);
                RateDecision::Rejected { retry_after }
            }
            Err(e) => {
                error!("Rate limit store unavailable, rejecting {}: {}", client_key, e);
                RateDecision::Rejected {
                    retry_after: self.fail_closed_retry,
                }
            }
        }
    }

    pub fn check(&self, client_key: &str) -> Result<u32, RateLimitError> {
        match self.try_acquire(client_key) {
            RateDecision::Allowed { remaining } => Ok(remaining),
            RateDecision::Rejected { retry_after } => Err(RateLimitError::Exceeded {
                key: client_key.to_string(),
                retry_after,
            }),
        }
    }

    /// Drop hits older than the longest configured window.
    pub fn purge_expired(&self) -> usize {
        let longest = self
            .windows
            .iter()
            .map(RateWindow::window_ms)
            .max()
            .unwrap_or(0);
        match self.store.purge_expired(now_ms().saturating_sub(longest)) {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to purge rate limit store: {}", e);
                0
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
