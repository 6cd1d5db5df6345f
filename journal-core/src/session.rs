//! Chat Session Tracker.
//!
//! The tracker is an explicit object owned by whoever serves the user; there is no process-wide
//! session registry. Sessions live in memory only and are lost on restart.
//!
//! Each session publishes its committed turns on a `watch` channel, so readers never wait for an
//! in-flight exchange to finish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::{Role, SessionId, Turn};

/// Exclusive access to one session. Holding the lock is what serializes a chat exchange.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Idle,
    AwaitingReply,
}

/// Point-in-time view of a session. While an exchange is in flight `history` holds the turns
/// committed before it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: ExchangeState,
    pub history: Vec<Turn>,
}

#[derive(Debug)]
pub struct ChatSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    turns: Vec<Turn>,
    published: watch::Sender<Vec<Turn>>,
}

impl ChatSession {
    fn new(id: SessionId) -> (Self, watch::Receiver<Vec<Turn>>) {
        let (published, committed) = watch::channel(Vec::new());
        let session = Self {
            id,
            started_at: Utc::now(),
            turns: Vec::new(),
            published,
        };
        (session, committed)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push(&mut self, turn: Turn) {
        self.commit([turn]);
    }

    /// Append turns and publish them to readers in one step.
    pub fn commit(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
        self.published.send_replace(self.turns.clone());
    }
}

#[derive(Debug, Clone)]
struct SessionSlot {
    handle: SessionHandle,
    committed: watch::Receiver<Vec<Turn>>,
}

#[derive(Debug, Default)]
pub struct ChatSessionTracker {
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
}

impl ChatSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_session(&self) -> SessionId {
        let id = Uuid::new_v4();
        let (session, committed) = ChatSession::new(id);
        let slot = SessionSlot {
            handle: Arc::new(Mutex::new(session)),
            committed,
        };
        self.sessions.write().await.insert(id, slot);
        tracing::info!(session_id = %id, "Chat session started");
        id
    }

    async fn slot(&self, id: SessionId) -> Result<SessionSlot, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn session(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        Ok(self.slot(id).await?.handle)
    }

    /// Append after any in-flight exchange on the same session has finished.
    pub async fn append_turn(
        &self,
        id: SessionId,
        role: Role,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let handle = self.session(id).await?;
        handle.lock().await.push(Turn::new(role, text));
        Ok(())
    }

    /// Committed turns. Does not wait for an in-flight exchange.
    pub async fn history(&self, id: SessionId) -> Result<Vec<Turn>, SessionError> {
        let slot = self.slot(id).await?;
        let history = slot.committed.borrow().clone();
        Ok(history)
    }

    /// `AwaitingReply` while an exchange holds the session.
    pub async fn state(&self, id: SessionId) -> Result<ExchangeState, SessionError> {
        let slot = self.slot(id).await?;
        Ok(exchange_state(&slot.handle))
    }

    /// State and committed history together, without waiting on the session lock.
    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        let slot = self.slot(id).await?;
        let state = exchange_state(&slot.handle);
        let history = slot.committed.borrow().clone();
        Ok(SessionSnapshot {
            session_id: id,
            state,
            history,
        })
    }

    /// Forget a session. Returns false if it did not exist.
    pub async fn end_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Chat session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn exchange_state(handle: &SessionHandle) -> ExchangeState {
    match handle.try_lock() {
        Ok(_) => ExchangeState::Idle,
        Err(_) => ExchangeState::AwaitingReply,
    }
}
