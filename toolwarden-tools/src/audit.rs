//! Audit event model.
//!
//! One [`AuditEvent`] is created per lifecycle step of an invocation. Events
//! for the same invocation share a correlation id. The serialized form is the
//! persisted line format, so field names are fixed.

use crate::traits::AuditSink;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Request,
    Approval,
    Denial,
    Execution,
    Result,
    Error,
    Blocked,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Request => "request",
            AuditEventType::Approval => "approval",
            AuditEventType::Denial => "denial",
            AuditEventType::Execution => "execution",
            AuditEventType::Result => "result",
            AuditEventType::Error => "error",
            AuditEventType::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditEventType::Result | AuditEventType::Error)
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(AuditEventType::Request),
            "approval" => Ok(AuditEventType::Approval),
            "denial" => Ok(AuditEventType::Denial),
            "execution" => Ok(AuditEventType::Execution),
            "result" => Ok(AuditEventType::Result),
            "error" => Ok(AuditEventType::Error),
            "blocked" => Ok(AuditEventType::Blocked),
            other => Err(format!("unknown audit event type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub tool_name: String,
    pub arguments: Value,
    pub correlation_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        tool_name: impl Into<String>,
        arguments: Value,
        correlation_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            tool_name: tool_name.into(),
            arguments,
            correlation_id: correlation_id.into(),
            session_id: session_id.into(),
            user: None,
            decision: None,
            result: None,
            duration_ms: None,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Single JSON line, as written by line-oriented backends.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The fields every event of one invocation shares.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub correlation_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub session_id: String,
    pub user: Option<String>,
}

impl InvocationRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        session_id: impl Into<String>,
        user: Option<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            tool_name: tool_name.into(),
            arguments,
            session_id: session_id.into(),
            user,
        }
    }

    pub fn event(&self, event_type: AuditEventType) -> AuditEvent {
        AuditEvent::new(
            event_type,
            self.tool_name.clone(),
            self.arguments.clone(),
            self.correlation_id.clone(),
            self.session_id.clone(),
        )
        .with_user(self.user.clone())
    }
}

/// Cap a result value at `max_bytes` of serialized JSON.
///
/// Oversized values are replaced by a marker object carrying the original
/// size and a UTF-8 safe prefix of the serialized text.
pub fn truncate_result(value: Value, max_bytes: usize) -> Value {
    let serialized = match serde_json::to_string(&value) {
        Ok(s) => s,
        Err(_) => return value,
    };
    if serialized.len() <= max_bytes {
        return value;
    }

    let mut cut = max_bytes;
    while cut > 0 && !serialized.is_char_boundary(cut) {
        cut -= 1;
    }

    json!({
        "truncated": true,
        "original_bytes": serialized.len(),
        "preview": &serialized[..cut],
    })
}

/// Keeps every event in memory. Used by tests and by embedders that want to
/// inspect a trail without a backend.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    pub fn for_correlation(&self, correlation_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for RecordingAuditSink {
    fn log(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_field_names() {
        let event = AuditEvent::new(
            AuditEventType::Result,
            "file.write",
            json!({"path": "a.txt"}),
            "c-1",
            "agent:user",
        )
        .with_duration(12)
        .with_result(json!({"ok": true}));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "result");
        assert_eq!(value["toolName"], "file.write");
        assert_eq!(value["correlationId"], "c-1");
        assert_eq!(value["sessionId"], "agent:user");
        assert_eq!(value["durationMs"], 12);
        assert!(value.get("user").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_line_parses_back() {
        let event = AuditEvent::new(AuditEventType::Denial, "t", json!({}), "c", "s")
            .with_decision("denied")
            .with_metadata("reason_code", "declined");
        let line = event.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let parsed: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_truncate_small_value_untouched() {
        let value = json!({"stdout": "hello"});
        assert_eq!(truncate_result(value.clone(), 1024), value);
    }

    #[test]
    fn test_truncate_large_value() {
        let value = json!({"stdout": "é".repeat(500)});
        let capped = truncate_result(value, 64);
        assert_eq!(capped["truncated"], true);
        assert!(capped["original_bytes"].as_u64().unwrap() > 64);
        assert!(capped["preview"].as_str().unwrap().len() <= 64);
    }

    #[test]
    fn test_recording_sink_filters() {
        let sink = RecordingAuditSink::new();
        let a = InvocationRecord::new("a", "t", json!({}), "s", None);
        let b = InvocationRecord::new("b", "t", json!({}), "s", Some("u".into()));
        sink.log(a.event(AuditEventType::Request));
        sink.log(b.event(AuditEventType::Request));
        sink.log(a.event(AuditEventType::Blocked));

        assert_eq!(sink.for_correlation("a").len(), 2);
        assert_eq!(sink.for_correlation("b")[0].user.as_deref(), Some("u"));
        assert_eq!(
            sink.event_types(),
            vec![AuditEventType::Request, AuditEventType::Request, AuditEventType::Blocked]
        );
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("blocked".parse::<AuditEventType>().unwrap(), AuditEventType::Blocked);
        assert!("other".parse::<AuditEventType>().is_err());
        assert!(AuditEventType::Error.is_terminal());
        assert!(!AuditEventType::Execution.is_terminal());
    }
}
