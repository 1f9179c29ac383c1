use serde::Serialize;

use crate::llm::GenerationMetrics;
use crate::session::{MessageId, Sender, SessionId};

/// Change notifications emitted by the engine. Subscribers redraw from these instead of
/// polling session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A new, not yet listed session exists
    SessionCreated { session: SessionId },

    MessageAppended {
        session: SessionId,
        message: MessageId,
        sender: Sender,
    },

    /// The open reply grew by `delta`; `text` is the whole reply so far
    MessageUpdated {
        session: SessionId,
        message: MessageId,
        delta: String,
        text: String,
    },

    ExchangeCompleted {
        session: SessionId,
        message: MessageId,
        done_reason: Option<String>,
        metrics: GenerationMetrics,
    },

    /// The exchange failed; the reply keeps whatever text had arrived
    ExchangeFailed {
        session: SessionId,
        message: Option<MessageId>,
        error: String,
    },

    TopicChanged { session: SessionId, topic: String },

    /// The session is now part of the conversation list
    SessionRecorded { session: SessionId },
}

impl ChatEvent {
    pub fn session(&self) -> SessionId {
        match self {
            ChatEvent::SessionCreated { session }
            | ChatEvent::MessageAppended { session, .. }
            | ChatEvent::MessageUpdated { session, .. }
            | ChatEvent::ExchangeCompleted { session, .. }
            | ChatEvent::ExchangeFailed { session, .. }
            | ChatEvent::TopicChanged { session, .. }
            | ChatEvent::SessionRecorded { session } => *session,
        }
    }
}
