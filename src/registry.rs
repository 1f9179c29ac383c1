use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::session::{ConversationSession, SessionId, SharedSession};

/// Owns every session, transient or listed.
///
/// A session becomes list-visible once `record` is called for it, which happens when
/// its first exchange completes. List order is recording order.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SharedSession>,
    order: Vec<SessionId>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a session without listing it.
    pub fn insert(&self, session: ConversationSession) -> SharedSession {
        let shared = SharedSession::new(session);
        self.lock()
            .sessions
            .insert(shared.id(), shared.clone());
        shared
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.lock().sessions.get(&id).cloned()
    }

    /// Append the session to the list. Returns false if it was already listed or is
    /// unknown to the registry.
    pub fn record(&self, id: SessionId) -> bool {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(&id) || inner.order.contains(&id) {
            return false;
        }
        inner.order.push(id);
        debug!(session = %id, position = inner.order.len(), "session recorded");
        true
    }

    pub fn is_recorded(&self, id: SessionId) -> bool {
        self.lock().order.contains(&id)
    }

    /// Ordered snapshot of recorded sessions. Later `record` calls do not affect it.
    pub fn list(&self) -> RegistrySnapshot {
        let inner = self.lock();
        let sessions: Vec<SharedSession> = inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect();
        RegistrySnapshot {
            sessions: sessions.into(),
        }
    }

    /// Number of recorded sessions
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frozen membership and order; the sessions themselves stay live.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    sessions: Arc<[SharedSession]>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, SharedSession> {
        self.sessions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&SharedSession> {
        self.sessions.get(index)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(SharedSession::id).collect()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a SharedSession;
    type IntoIter = std::slice::Iter<'a, SharedSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
