use chat_contract::{ChatError, ChatSession, SessionStore};
use tracing::{debug, warn};

/// A session taken out of the local list, with the slot it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemoval {
    index: usize,
    session: ChatSession,
}

impl PendingRemoval {
    #[must_use]
    pub fn session(&self) -> &ChatSession {
        &self.session
    }
}

/// Local, reversible view of the stored sessions.
///
/// Removals show up immediately and are put back in place when the store
/// rejects the delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionList {
    sessions: Vec<ChatSession>,
}

impl SessionList {
    pub async fn load(store: &dyn SessionStore) -> Result<Self, ChatError> {
        Ok(Self::from_sessions(store.list_sessions().await?))
    }

    #[must_use]
    pub fn from_sessions(sessions: Vec<ChatSession>) -> Self {
        Self { sessions }
    }

    #[must_use]
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn remove_local(&mut self, session_id: &str) -> Option<PendingRemoval> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == session_id)?;
        let session = self.sessions.remove(index);
        Some(PendingRemoval { index, session })
    }

    pub fn restore(&mut self, removal: PendingRemoval) {
        let index = removal.index.min(self.sessions.len());
        self.sessions.insert(index, removal.session);
    }

    /// Replaces a session with the same id, or puts a new one first.
    pub fn upsert(&mut self, session: ChatSession) {
        match self.sessions.iter_mut().find(|slot| slot.id == session.id) {
            Some(slot) => *slot = session,
            None => self.sessions.insert(0, session),
        }
    }

    /// Removes the session locally, then deletes it in the store. On failure
    /// the entry is restored and `on_error` is called before the error is
    /// returned.
    pub async fn delete(
        &mut self,
        store: &dyn SessionStore,
        session_id: &str,
        on_error: impl FnOnce(&ChatError),
    ) -> Result<(), ChatError> {
        let removal = self.remove_local(session_id);
        match store.delete_session(session_id).await {
            Ok(()) => {
                debug!(session_id, "session deleted");
                Ok(())
            }
            Err(error) => {
                warn!(session_id, %error, "session delete failed; restoring entry");
                if let Some(removal) = removal {
                    self.restore(removal);
                }
                on_error(&error);
                Err(error)
            }
        }
    }

    pub async fn rename(
        &mut self,
        store: &dyn SessionStore,
        session_id: &str,
        title: &str,
    ) -> Result<(), ChatError> {
        if title.trim().is_empty() {
            return Err(ChatError::validation("session title must not be empty"));
        }
        let session = store.update_session(session_id, title.trim()).await?;
        self.upsert(session);
        Ok(())
    }
}
