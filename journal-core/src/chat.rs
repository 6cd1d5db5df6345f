//! One chat exchange: `Idle -> AwaitingReply -> Idle`.
//!
//! The session is held for the whole exchange. Turns are appended only after a complete reply;
//! on any gateway error (including timeout) the history is left exactly as it was.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::JournalError;
use crate::gateway::{ChatRequest, Gateway};
use crate::models::{SessionId, Turn};
use crate::session::ChatSessionTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub session_id: SessionId,
    pub request_id: Uuid,
    pub reply: String,
}

#[derive(Clone)]
pub struct ChatService {
    sessions: Arc<ChatSessionTracker>,
    gateway: Arc<dyn Gateway>,
}

impl ChatService {
    pub fn new(sessions: Arc<ChatSessionTracker>, gateway: Arc<dyn Gateway>) -> Self {
        Self { sessions, gateway }
    }

    pub fn sessions(&self) -> &ChatSessionTracker {
        &self.sessions
    }

    /// Run one exchange. Passing the `request_id` of an earlier attempt that timed out lets the
    /// engine recognise the retry; `None` starts a new request.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        text: &str,
        request_id: Option<Uuid>,
    ) -> Result<ChatReply, JournalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(JournalError::InvalidInput(
                "chat message must not be empty".to_string(),
            ));
        }

        let handle = self.sessions.session(session_id).await?;
        let mut session = handle.lock().await;

        let history = session.turns().to_vec();
        let request = match request_id {
            Some(request_id) => {
                ChatRequest::with_request_id(session_id, text, history, request_id)
            }
            None => ChatRequest::new(session_id, text, history),
        };
        let reply = self.gateway.send_chat_message(&request).await?;

        session.commit([Turn::user(text), Turn::assistant(reply.clone())]);
        tracing::debug!(
            session_id = %session_id,
            turns = session.turns().len(),
            "Chat exchange completed"
        );

        Ok(ChatReply {
            session_id,
            request_id: request.request_id,
            reply,
        })
    }
}
