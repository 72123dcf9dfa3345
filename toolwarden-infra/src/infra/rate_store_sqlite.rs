use crate::infra::distributed::{Admission, DistributedError, RateLimitStore, RateWindow};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rate limit store backed by a SQLite file that every process on the host
/// opens. Check-and-record runs inside an `IMMEDIATE` transaction, which
/// takes the database write lock up front and serializes admissions across
/// connections and processes.
pub struct SqliteRateLimitStore {
    conn: Mutex<Connection>,
}

impl SqliteRateLimitStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DistributedError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rate_limit_hits (
                client_key TEXT NOT NULL,
                hit_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rate_limit_key_time
                ON rate_limit_hits(client_key, hit_ms);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn as_sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

impl RateLimitStore for SqliteRateLimitStore {
    fn try_acquire(
        &self,
        key: &str,
        windows: &[RateWindow],
        now_ms: u64,
    ) -> Result<Admission, DistributedError> {
        let longest = windows.iter().map(RateWindow::window_ms).max().unwrap_or(0);
        let now = as_sql_ms(now_ms);

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM rate_limit_hits WHERE client_key = ?1 AND hit_ms <= ?2",
            params![key, as_sql_ms(now_ms.saturating_sub(longest))],
        )?;

        let mut remaining = u32::MAX;
        let mut retry_after_ms: Option<i64> = None;

        for window in windows {
            let window_ms = as_sql_ms(window.window_ms());
            let start = now.saturating_sub(window_ms);
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM rate_limit_hits WHERE client_key = ?1 AND hit_ms > ?2",
                params![key, start],
                |row| row.get(0),
            )?;
            let limit = i64::from(window.limit);

            if count < limit {
                remaining = remaining.min((limit - count - 1) as u32);
                continue;
            }

            let wait = if limit == 0 {
                window_ms
            } else {
                let blocking_hit: Option<i64> = tx
                    .query_row(
                        "SELECT hit_ms FROM rate_limit_hits
                         WHERE client_key = ?1 AND hit_ms > ?2
                         ORDER BY hit_ms ASC LIMIT 1 OFFSET ?3",
                        params![key, start, count - limit],
                        |row| row.get(0),
                    )
                    .optional()?;
                blocking_hit.map_or(window_ms, |hit| (hit + window_ms - now).max(0))
            };
            retry_after_ms = Some(retry_after_ms.map_or(wait, |current| current.max(wait)));
        }

        let admission = match retry_after_ms {
            Some(wait) => Admission::Exceeded {
                retry_after: Duration::from_millis(wait.max(1) as u64),
            },
            None => {
                tx.execute(
                    "INSERT INTO rate_limit_hits (client_key, hit_ms) VALUES (?1, ?2)",
                    params![key, now],
                )?;
                Admission::Admitted { remaining }
            }
        };

        tx.commit()?;
        Ok(admission)
    }

    fn purge_expired(&self, older_than_ms: u64) -> Result<usize, DistributedError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM rate_limit_hits WHERE hit_ms < ?1",
            params![as_sql_ms(older_than_ms)],
        )?;
        Ok(removed)
    }
}
