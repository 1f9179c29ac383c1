use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::llm::{GenerationMetrics, ResponseRecord};

pub const DEFAULT_TOPIC: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// Lifecycle of an assistant reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    /// Still receiving fragments
    Streaming,
    Complete,
    /// The exchange failed or was cancelled; text is whatever arrived first
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub status: MessageStatus,
    /// Continuation context as it was when the message was created. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn user(text: String, context: Vec<i64>) -> Self {
        Self {
            id: MessageId::new(),
            text,
            sender: Sender::User,
            status: MessageStatus::Complete,
            context: Some(context),
            created_at: Utc::now(),
        }
    }

    fn assistant() -> Self {
        Self {
            id: MessageId::new(),
            text: String::new(),
            sender: Sender::Assistant,
            status: MessageStatus::Streaming,
            context: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Idle,
    Streaming,
}

/// Where the current topic came from. Generated titles never replace a user rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicSource {
    Placeholder,
    Generated,
    User,
}

/// What the caller needs to put an exchange on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub prompt: String,
    pub context: Vec<i64>,
    pub user_message: MessageId,
    pub assistant_message: MessageId,
}

/// Result of feeding one record to a streaming session
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The open message grew; `text` is the full accumulated reply
    Fragment {
        message: MessageId,
        delta: String,
        text: String,
    },
    Completed(CompletedExchange),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExchange {
    pub message: MessageId,
    pub text: String,
    pub done_reason: Option<String>,
    pub metrics: GenerationMetrics,
    /// Set when this completion should trigger auto-titling; holds the seed text.
    pub title_seed: Option<String>,
}

/// One conversation: ordered messages, continuation context, topic, timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    id: SessionId,
    topic: String,
    topic_source: TopicSource,
    messages: Vec<Message>,
    context: Vec<i64>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(skip, default = "idle")]
    state: SessionState,
    #[serde(skip)]
    accumulator: String,
    #[serde(skip)]
    pending_prompt: Option<String>,
    title_requested: bool,
}

fn idle() -> SessionState {
    SessionState::Idle
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::with_topic(DEFAULT_TOPIC)
    }

    pub fn with_topic(placeholder: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            topic: placeholder.into(),
            topic_source: TopicSource::Placeholder,
            messages: Vec::new(),
            context: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
            state: SessionState::Idle,
            accumulator: String::new(),
            pending_prompt: None,
            title_requested: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_source(&self) -> TopicSource {
        self.topic_source
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn context(&self) -> &[i64] {
        &self.context
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn title_requested(&self) -> bool {
        self.title_requested
    }

    /// Idle -> Streaming. Appends the user message and an empty open reply.
    ///
    /// Rejected without touching state if the text is blank or an exchange is already
    /// in flight.
    pub fn begin_exchange(&mut self, text: &str) -> Result<Exchange> {
        if self.is_streaming() {
            return Err(ChatError::Busy(self.id));
        }
        let prompt = text.trim();
        if prompt.is_empty() {
            return Err(ChatError::InvalidInput);
        }

        let user = Message::user(prompt.to_string(), self.context.clone());
        let assistant = Message::assistant();
        let exchange = Exchange {
            prompt: prompt.to_string(),
            context: self.context.clone(),
            user_message: user.id,
            assistant_message: assistant.id,
        };

        self.messages.push(user);
        self.messages.push(assistant);
        self.accumulator.clear();
        self.pending_prompt = Some(exchange.prompt.clone());
        self.state = SessionState::Streaming;

        Ok(exchange)
    }

    /// Feed one decoded record. Records arriving while idle are ignored.
    pub fn apply_record(&mut self, record: &ResponseRecord) -> Option<RecordOutcome> {
        if !self.is_streaming() {
            return None;
        }

        if !record.done {
            self.accumulator.push_str(&record.response);
            let text = self.accumulator.clone();
            let message = self.open_message_mut()?;
            message.text = text.clone();
            return Some(RecordOutcome::Fragment {
                message: message.id,
                delta: record.response.clone(),
                text,
            });
        }

        self.accumulator.push_str(&record.response);
        let text = std::mem::take(&mut self.accumulator);
        let message = self.open_message_mut()?;
        message.text = text.clone();
        message.status = MessageStatus::Complete;
        let message = message.id;

        let first_exchange = self.context.is_empty();
        self.context = record.context.clone().unwrap_or_default();
        self.updated_at = Some(Utc::now());
        self.state = SessionState::Idle;

        let prompt = self.pending_prompt.take();
        let title_seed = if first_exchange && !self.title_requested {
            self.title_requested = true;
            prompt
        } else {
            None
        };

        Some(RecordOutcome::Completed(CompletedExchange {
            message,
            text,
            done_reason: record.done_reason.clone(),
            metrics: record.metrics.clone(),
            title_seed,
        }))
    }

    /// Streaming -> Idle after a transport failure or cancellation. Partial text stays.
    pub fn fail_exchange(&mut self) -> Option<MessageId> {
        if !self.is_streaming() {
            return None;
        }
        self.accumulator.clear();
        self.pending_prompt = None;
        self.state = SessionState::Idle;

        let message = self.open_message_mut()?;
        message.status = MessageStatus::Interrupted;
        Some(message.id)
    }

    /// Apply an auto-generated title. Returns false if the user has renamed meanwhile.
    pub fn apply_generated_title(&mut self, title: String) -> bool {
        if self.topic_source == TopicSource::User {
            return false;
        }
        self.topic = title;
        self.topic_source = TopicSource::Generated;
        true
    }

    pub fn rename(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
        self.topic_source = TopicSource::User;
    }

    fn open_message_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .last_mut()
            .filter(|message| message.sender == Sender::Assistant)
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A session behind the mutex that serializes every write to it.
///
/// The lock is only ever held for a synchronous transition, never across an await.
#[derive(Debug, Clone)]
pub struct SharedSession {
    id: SessionId,
    inner: Arc<Mutex<ConversationSession>>,
}

impl SharedSession {
    pub fn new(session: ConversationSession) -> Self {
        Self {
            id: session.id(),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current state, for callers that want to look without holding the lock.
    pub fn snapshot(&self) -> ConversationSession {
        self.lock().clone()
    }
}
