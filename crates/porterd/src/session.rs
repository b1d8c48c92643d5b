//! Visitor session state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Where a visitor conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStep {
    /// Session created; no message handled yet.
    Greeting,
    /// Waiting for the visitor to state their name and whom to meet.
    Collecting,
    /// Approval request dispatched; waiting for the reply to correlate.
    AwaitingReply,
    /// Approval flow finished; further messages are free-form queries.
    Resolved,
}

/// Final outcome of a visitor approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Denied,
    Expired,
}

impl Outcome {
    /// Status string stored in the visitor log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approved => "Approved",
            Outcome::Denied => "Denied",
            Outcome::Expired => "Expired",
        }
    }
}

/// One visitor's conversation with the approval workflow.
#[derive(Debug)]
pub struct VisitorSession {
    pub id: Uuid,
    pub step: ConversationStep,
    pub visitor_name: Option<String>,
    pub responsible_party: Option<String>,
    /// Messaging address the approval request was dispatched to.
    pub responsible_channel: Option<String>,
    pub outcome: Option<Outcome>,
    pub last_active: DateTime<Utc>,
}

impl VisitorSession {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            step: ConversationStep::Greeting,
            visitor_name: None,
            responsible_party: None,
            responsible_channel: None,
            outcome: None,
            last_active: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Registry of live sessions.
///
/// Each session carries its own async lock so the conversation path and
/// the reply/status path cannot interleave a transition.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<VisitorSession>>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session in `Greeting`.
    pub fn create(&self) -> (Uuid, Arc<AsyncMutex<VisitorSession>>) {
        let id = Uuid::new_v4();
        let session = Arc::new(AsyncMutex::new(VisitorSession::new(id)));
        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(id, session.clone());
        tracing::debug!(%id, "visitor session created");
        (id, session)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<AsyncMutex<VisitorSession>>> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(&id)
            .cloned()
    }

    /// Existing session, or a fresh one when the id is absent or unknown.
    pub fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, Arc<AsyncMutex<VisitorSession>>) {
        if let Some(id) = id {
            if let Some(session) = self.get(id) {
                return (id, session);
            }
        }
        self.create()
    }

    pub fn remove(&self, id: Uuid) {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .remove(&id);
    }

    /// Snapshot of every live session, for the expiry sweep.
    pub fn all(&self) -> Vec<(Uuid, Arc<AsyncMutex<VisitorSession>>)> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .iter()
            .map(|(id, session)| (*id, session.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_starts_in_greeting() {
        let manager = SessionManager::new();
        let (id, session) = manager.create();
        let session = session.lock().await;
        assert_eq!(session.id, id);
        assert_eq!(session.step, ConversationStep::Greeting);
        assert!(session.outcome.is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_with_unknown_id_makes_new() {
        let manager = SessionManager::new();
        let unknown = Uuid::new_v4();
        let (id, _) = manager.get_or_create(Some(unknown));
        assert_ne!(id, unknown);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let manager = SessionManager::new();
        let (id, _) = manager.create();
        let (again, _) = manager.get_or_create(Some(id));
        assert_eq!(id, again);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let manager = SessionManager::new();
        let (id, _) = manager.create();
        manager.remove(id);
        assert!(manager.get(id).is_none());
        assert!(manager.is_empty());
    }
}
