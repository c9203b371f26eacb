//! Session lookup.
//!
//! The session store belongs to the surrounding REST layer. This subsystem
//! only reads from it to find which sandbox a session is currently bound to.
//! A session without a sandbox is a valid state: exposures can be recorded
//! before the sandbox is running, but forwarding fails until one is bound.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// The parts of a session record this subsystem cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: String,
    /// Sandbox currently running the session, if any.
    #[serde(default)]
    pub sandbox_id: Option<String>,
    /// Owning user.
    #[serde(default)]
    pub owner: Option<String>,
}

impl SessionRecord {
    /// Create a session bound to a sandbox.
    pub fn new(id: impl Into<String>, sandbox_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            sandbox_id,
            owner: None,
        }
    }

    /// The bound sandbox, treating an empty identifier as unbound.
    pub fn bound_sandbox(&self) -> Option<&str> {
        self.sandbox_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Read access to session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session by ID.
    async fn get_session(&self, session_id: &str) -> Option<SessionRecord>;
}

/// Process-local session store.
///
/// Seeded from `[[sessions]]` in the configuration and used by tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records.
    pub fn with_sessions(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or replace a session record.
    pub fn insert(&self, record: SessionRecord) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    /// Bind (or rebind) a session to a sandbox.
    ///
    /// Returns false if the session does not exist.
    pub fn bind_sandbox(&self, session_id: &str, sandbox_id: Option<String>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(session_id) {
            Some(record) => {
                record.sandbox_id = sandbox_id;
                true
            }
            None => false,
        }
    }

    /// Remove a session record.
    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Number of known sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_rebind() {
        let store = InMemorySessionStore::with_sessions([SessionRecord::new("sess-1", None)]);

        let record = store.get_session("sess-1").await.unwrap();
        assert_eq!(record.bound_sandbox(), None);

        assert!(store.bind_sandbox("sess-1", Some("sbx-1".to_string())));
        let record = store.get_session("sess-1").await.unwrap();
        assert_eq!(record.bound_sandbox(), Some("sbx-1"));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(store.get_session("nope").await.is_none());
        assert!(!store.bind_sandbox("nope", Some("sbx".to_string())));
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_sandbox_id_is_unbound() {
        let record = SessionRecord::new("sess-1", Some(String::new()));
        assert_eq!(record.bound_sandbox(), None);
    }
}
