//! Streaming conversation engine for a local Ollama server.
//!
//! Requests carry the server's continuation context forward, replies are decoded line
//! by line into the open message, and a conversation's first completed exchange kicks
//! off a one-shot title request before the conversation is listed.

pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod prompts;
pub mod registry;
pub mod session;
pub mod streaming;
pub mod title;

pub use config::Config;
pub use engine::{ConversationEngine, ExchangeReply};
pub use error::{ChatError, Result};
pub use events::ChatEvent;
pub use llm::{ByteStream, GenerateRequest, GenerationMetrics, OllamaClient, ResponseRecord, Transport};
pub use registry::{ConversationRegistry, RegistrySnapshot};
pub use session::{
    ConversationSession, Message, MessageId, MessageStatus, Sender, SessionId, SessionState,
    SharedSession,
};
pub use streaming::StreamDecoder;
pub use title::TitleGenerator;
