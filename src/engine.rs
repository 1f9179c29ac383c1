use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, TitleConfig};
use crate::error::{ChatError, Result};
use crate::events::ChatEvent;
use crate::llm::{GenerateRequest, GenerationMetrics, OllamaClient, Transport};
use crate::registry::{ConversationRegistry, RegistrySnapshot};
use crate::session::{
    CompletedExchange, ConversationSession, Exchange, MessageId, RecordOutcome, Sender,
    SessionId, SharedSession,
};
use crate::streaming::StreamDecoder;
use crate::title::TitleGenerator;

const EVENT_CAPACITY: usize = 1000;

/// What a successful exchange produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeReply {
    pub session: SessionId,
    pub message: MessageId,
    pub text: String,
    pub done_reason: Option<String>,
    pub metrics: GenerationMetrics,
    /// This was the session's first completed exchange and auto-titling was started
    pub title_requested: bool,
}

/// Runs exchanges against the server and keeps the registry and subscribers in sync.
#[derive(Clone)]
pub struct ConversationEngine {
    registry: Arc<ConversationRegistry>,
    transport: Arc<dyn Transport>,
    titles: TitleGenerator,
    model: String,
    title_config: TitleConfig,
    events: broadcast::Sender<ChatEvent>,
}

impl ConversationEngine {
    /// Engine talking to the server named in `config`
    pub fn new(config: &Config) -> Result<Self> {
        let client = OllamaClient::new(&config.server)?;
        info!(endpoint = %client.endpoint(), model = %config.model, "conversation engine ready");
        Ok(Self::with_transport(Arc::new(client), config))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry: Arc::new(ConversationRegistry::new()),
            titles: TitleGenerator::new(Arc::clone(&transport), config.model.clone(), &config.title),
            transport,
            model: config.model.clone(),
            title_config: config.title.clone(),
            events,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Start a conversation. It stays out of `list()` until its first exchange completes.
    pub fn new_session(&self) -> SessionId {
        let session = self
            .registry
            .insert(ConversationSession::with_topic(self.title_config.placeholder.clone()));
        let id = session.id();
        debug!(session = %id, "session created");
        self.emit(ChatEvent::SessionCreated { session: id });
        id
    }

    pub fn session(&self, id: SessionId) -> Option<SharedSession> {
        self.registry.get(id)
    }

    pub fn list(&self) -> RegistrySnapshot {
        self.registry.list()
    }

    pub fn rename(&self, id: SessionId, topic: &str) -> Result<()> {
        let session = self.session(id).ok_or(ChatError::UnknownSession(id))?;
        session.lock().rename(topic);
        self.emit(ChatEvent::TopicChanged {
            session: id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Send `text` on session `id` and stream the reply into it.
    ///
    /// Dropping the returned future closes the connection and leaves the reply with
    /// whatever text had arrived, marked interrupted.
    pub async fn submit(&self, id: SessionId, text: &str) -> Result<ExchangeReply> {
        let session = self.session(id).ok_or(ChatError::UnknownSession(id))?;
        let exchange = session.lock().begin_exchange(text)?;

        self.emit(ChatEvent::MessageAppended {
            session: id,
            message: exchange.user_message,
            sender: Sender::User,
        });
        self.emit(ChatEvent::MessageAppended {
            session: id,
            message: exchange.assistant_message,
            sender: Sender::Assistant,
        });

        let guard = ExchangeGuard {
            session: session.clone(),
            events: self.events.clone(),
            armed: true,
        };

        let completed = match self.stream_exchange(&session, &exchange).await {
            Ok(completed) => {
                guard.disarm();
                completed
            }
            Err(err) => {
                guard.fail(&err);
                return Err(err);
            }
        };

        self.emit(ChatEvent::ExchangeCompleted {
            session: id,
            message: completed.message,
            done_reason: completed.done_reason.clone(),
            metrics: completed.metrics.clone(),
        });

        let title_requested = match completed.title_seed {
            Some(seed) => self.on_first_exchange(session, seed),
            None => false,
        };

        Ok(ExchangeReply {
            session: id,
            message: completed.message,
            text: completed.text,
            done_reason: completed.done_reason,
            metrics: completed.metrics,
            title_requested,
        })
    }

    /// `submit`, abandoned as soon as `token` is cancelled.
    pub async fn submit_cancellable(
        &self,
        id: SessionId,
        text: &str,
        token: &CancellationToken,
    ) -> Result<ExchangeReply> {
        tokio::select! {
            result = self.submit(id, text) => result,
            _ = token.cancelled() => Err(ChatError::Cancelled),
        }
    }

    async fn stream_exchange(
        &self,
        session: &SharedSession,
        exchange: &Exchange,
    ) -> Result<CompletedExchange> {
        let request = GenerateRequest::new(&self.model, &exchange.prompt, &exchange.context, true);
        let body = self.transport.open_stream(&request).await?;
        let mut decoder = StreamDecoder::new(body);

        while let Some(record) = decoder.next_record().await {
            let record = record?;
            let outcome = session.lock().apply_record(&record);

            match outcome {
                Some(RecordOutcome::Fragment {
                    message,
                    delta,
                    text,
                }) => {
                    if !delta.is_empty() {
                        self.emit(ChatEvent::MessageUpdated {
                            session: session.id(),
                            message,
                            delta,
                            text,
                        });
                    }
                }
                Some(RecordOutcome::Completed(completed)) => {
                    if !record.response.is_empty() {
                        self.emit(ChatEvent::MessageUpdated {
                            session: session.id(),
                            message: completed.message,
                            delta: record.response.clone(),
                            text: completed.text.clone(),
                        });
                    }
                    debug!(
                        session = %session.id(),
                        skipped = decoder.skipped(),
                        done_reason = ?completed.done_reason,
                        "exchange completed"
                    );
                    return Ok(completed);
                }
                None => {}
            }
        }

        Err(ChatError::Incomplete)
    }

    /// Title the session in the background, then list it. Returns whether a title
    /// task was started.
    fn on_first_exchange(&self, session: SharedSession, seed: String) -> bool {
        let id = session.id();
        if !self.title_config.enabled {
            record_session(&self.registry, &self.events, id);
            return false;
        }

        let titles = self.titles.clone();
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let record_on_failure = self.title_config.record_on_failure;

        tokio::spawn(async move {
            match titles.generate(&seed).await {
                Ok(title) => {
                    let applied = session.lock().apply_generated_title(title.clone());
                    if applied {
                        let _ = events.send(ChatEvent::TopicChanged {
                            session: id,
                            topic: title,
                        });
                    } else {
                        debug!(session = %id, "keeping user topic over generated title");
                    }
                    record_session(&registry, &events, id);
                }
                Err(err) => {
                    warn!(session = %id, error = %err, "title generation failed");
                    if record_on_failure {
                        record_session(&registry, &events, id);
                    }
                }
            }
        });
        true
    }

    fn emit(&self, event: ChatEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn record_session(
    registry: &ConversationRegistry,
    events: &broadcast::Sender<ChatEvent>,
    id: SessionId,
) {
    if registry.record(id) {
        let _ = events.send(ChatEvent::SessionRecorded { session: id });
    }
}

/// Moves the session back to idle if the exchange future is dropped mid-flight.
struct ExchangeGuard {
    session: SharedSession,
    events: broadcast::Sender<ChatEvent>,
    armed: bool,
}

impl ExchangeGuard {
    fn disarm(mut self) {
        self.armed = false;
    }

    fn fail(mut self, err: &ChatError) {
        self.armed = false;
        self.mark_failed(err.to_string());
    }

    fn mark_failed(&self, error: String) {
        let message = self.session.lock().fail_exchange();
        warn!(session = %self.session.id(), error = %error, "exchange failed");
        let _ = self.events.send(ChatEvent::ExchangeFailed {
            session: self.session.id(),
            message,
            error,
        });
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.mark_failed(ChatError::Cancelled.to_string());
        }
    }
}
