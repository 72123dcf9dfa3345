use crate::infra::contracts::{AuditBackend, AuditError};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use toolwarden_tools::{AuditEvent, AuditEventType};

/// Filter for [`SqliteAuditBackend::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub correlation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// Embedded relational audit store with indexed lookup columns. The full
/// event is kept verbatim in `payload`.
pub struct SqliteAuditBackend {
    conn: Mutex<Connection>,
}

fn sortable_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteAuditBackend {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, AuditError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                session_id TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_events(event_type);
            CREATE INDEX IF NOT EXISTS idx_audit_tool_name ON audit_events(tool_name);
            CREATE INDEX IF NOT EXISTS idx_audit_session_id ON audit_events(session_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError> {
        let mut sql = String::from("SELECT payload FROM audit_events WHERE 1 = 1");
        let mut values: Vec<SqlValue> = Vec::new();

        let mut filter = |column: &str, op: &str, value: String| {
            values.push(SqlValue::Text(value));
            sql.push_str(&format!(" AND {} {} ?{}", column, op, values.len()));
        };
        if let Some(session_id) = &query.session_id {
            filter("session_id", "=", session_id.clone());
        }
        if let Some(tool_name) = &query.tool_name {
            filter("tool_name", "=", tool_name.clone());
        }
        if let Some(event_type) = query.event_type {
            filter("event_type", "=", event_type.as_str().to_string());
        }
        if let Some(correlation_id) = &query.correlation_id {
            filter("correlation_id", "=", correlation_id.clone());
        }
        if let Some(since) = &query.since {
            filter("timestamp", ">=", sortable_timestamp(since));
        }
        if let Some(until) = &query.until {
            filter("timestamp", "<", sortable_timestamp(until));
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            values.push(SqlValue::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for payload in rows {
            events.push(serde_json::from_str(&payload?)?);
        }
        Ok(events)
    }

    pub fn count(&self) -> Result<usize, AuditError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl AuditBackend for SqliteAuditBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let payload = event.to_json_line()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, tool_name, session_id, correlation_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sortable_timestamp(&event.timestamp),
                event.event_type.as_str(),
                event.tool_name,
                event.session_id,
                event.correlation_id,
                payload
            ],
        )?;
        Ok(())
    }
}
