use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Advisor,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Advisor => "advisor",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn now(role: Speaker, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One advisor conversation.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    /// Financial context rendered when the session started.
    pub context: String,
}

/// Keyed storage for advisor sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session_id: String, record: SessionRecord);
    async fn get(&self, session_id: &str) -> Option<SessionRecord>;
    /// Returns `false` if the session does not exist.
    async fn append(&self, session_id: &str, entry: HistoryEntry) -> bool;
    async fn remove(&self, session_id: &str) -> Option<SessionRecord>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session_id: String, record: SessionRecord) {
        self.sessions.write().await.insert(session_id, record);
    }

    async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn append(&self, session_id: &str, entry: HistoryEntry) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(record) => {
                record.history.push(entry);
                true
            }
            None => false,
        }
    }

    async fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.write().await.remove(session_id)
    }
}
