use crate::interfaces::{RuntimeError, SessionStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Process-local session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn remove(&self, session_key: &str) -> Option<Vec<Value>> {
        self.sessions.lock().remove(session_key)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_key: &str) -> Result<Vec<Value>, RuntimeError> {
        Ok(self
            .sessions
            .lock()
            .get(session_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session_key: &str, history: &[Value]) -> Result<(), RuntimeError> {
        self.sessions
            .lock()
            .insert(session_key.to_string(), history.to_vec());
        Ok(())
    }
}
