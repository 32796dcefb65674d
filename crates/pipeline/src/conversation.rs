//! Conversation memory and per-session write serialization.

use iahub_core::error::Error;
use iahub_core::message::{Message, SessionId};
use iahub_core::store::HistoryStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Ordered, append-only message history per session.
pub struct ConversationMemory {
    store: Arc<dyn HistoryStore>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// The full ordered history; empty for a new session.
    pub async fn load(&self, session: &SessionId) -> Result<Vec<Message>, Error> {
        let history = self.store.load(session).await.map_err(Error::Persistence)?;
        debug!(session = %session, messages = history.len(), "Loaded history");
        Ok(history)
    }

    pub async fn append(&self, session: &SessionId, message: &Message) -> Result<(), Error> {
        self.store
            .append(session, message)
            .await
            .map_err(Error::Persistence)
    }

    /// Append both messages of a turn atomically.
    ///
    /// With `expected_len` set, fails if the history no longer holds exactly
    /// that many messages.
    pub async fn append_turn(
        &self,
        session: &SessionId,
        expected_len: Option<usize>,
        user: &Message,
        assistant: &Message,
    ) -> Result<(), Error> {
        self.store
            .append_all(session, expected_len, &[user.clone(), assistant.clone()])
            .await
            .map_err(Error::Persistence)
    }
}

/// Held while a session's history is read, extended and written back.
pub type SessionGuard = OwnedMutexGuard<()>;

/// One async mutex per live session.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Idle entries are swept once the map grows past this.
const PRUNE_THRESHOLD: usize = 1024;

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a session.
    pub async fn acquire(&self, session: &SessionId) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(session.key()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked sessions.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHistoryStore;
    use iahub_core::ErrorKind;
    use iahub_core::message::{Role, TenantId};
    use iahub_store::InMemoryStore;
    use std::time::Duration;

    fn session(sender: &str) -> SessionId {
        SessionId::new(sender, TenantId::new("15550001111"))
    }

    #[tokio::test]
    async fn load_after_appends_preserves_order() {
        let memory = ConversationMemory::new(Arc::new(InMemoryStore::new()));
        let s = session("5511");

        memory
            .append_turn(&s, Some(0), &Message::user("Oi"), &Message::assistant("Olá!"))
            .await
            .unwrap();
        memory
            .append(&s, &Message::user("Qual o preço?"))
            .await
            .unwrap();

        let history = memory.load(&s).await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(history[2].content, "Qual o preço?");
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let memory = ConversationMemory::new(Arc::new(InMemoryStore::new()));
        memory.append(&session("a"), &Message::user("1")).await.unwrap();
        assert!(memory.load(&session("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_persistence_error() {
        let store = TestHistoryStore::new(Arc::new(InMemoryStore::new())).failing_appends();
        let memory = ConversationMemory::new(Arc::new(store));
        let err = memory
            .append(&session("a"), &Message::user("1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[tokio::test(start_paused = true)]
    async fn same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire(&session("a")).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&session("a")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // A different session is not blocked.
        let _other = locks.acquire(&session("b")).await;

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len().await, 2);
    }
}
