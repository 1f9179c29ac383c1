#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use ollama_chat::config::Config;
use ollama_chat::{
    ByteStream, ChatError, ChatEvent, ConversationEngine, GenerateRequest, GenerationMetrics,
    ResponseRecord, Result, SessionId, Transport,
};

/// One step of a scripted response body
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(String),
    Fail(String),
    /// Never yields again
    Hang,
}

pub fn chunk(text: &str) -> Step {
    Step::Chunk(text.to_string())
}

pub fn fragment_line(text: &str) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "model": "llama3",
            "created_at": "2024-05-01T10:00:00Z",
            "response": text,
            "done": false,
        })
    )
}

pub fn done_line(context: &[i64]) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "model": "llama3",
            "created_at": "2024-05-01T10:00:01Z",
            "response": "",
            "done": true,
            "done_reason": "stop",
            "context": context,
            "total_duration": 1200,
            "eval_count": 3,
        })
    )
}

/// Transport that plays back one script per streamed call and answers title requests
/// from a fixed reply.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    title: Mutex<std::result::Result<String, String>>,
    title_gate: Option<Arc<Notify>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            title: Mutex::new(Ok("Friendly Greeting".to_string())),
            title_gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, steps: Vec<Step>) -> Self {
        self.scripts.lock().unwrap().push_back(steps);
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        *self.title.lock().unwrap() = Ok(title.to_string());
        self
    }

    pub fn with_title_failure(self, error: &str) -> Self {
        *self.title.lock().unwrap() = Err(error.to_string());
        self
    }

    /// Title replies wait until the gate is notified
    pub fn with_title_gate(mut self, gate: Arc<Notify>) -> Self {
        self.title_gate = Some(gate);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stream_requests(&self) -> Vec<GenerateRequest> {
        self.requests().into_iter().filter(|r| r.stream).collect()
    }

    pub fn title_requests(&self) -> Vec<GenerateRequest> {
        self.requests().into_iter().filter(|r| !r.stream).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_stream(&self, request: &GenerateRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Transport("connection refused".into()))?;

        let hangs = steps.iter().any(|step| matches!(step, Step::Hang));
        let items: Vec<Result<Vec<u8>>> = steps
            .into_iter()
            .filter_map(|step| match step {
                Step::Chunk(text) => Some(Ok(text.into_bytes())),
                Step::Fail(error) => Some(Err(ChatError::Transport(error))),
                Step::Hang => None,
            })
            .collect();

        let body = stream::iter(items);
        if hangs {
            Ok(Box::pin(futures::StreamExt::chain(body, stream::pending())))
        } else {
            Ok(Box::pin(body))
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ResponseRecord> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.title_gate {
            gate.notified().await;
        }
        let reply = self.title.lock().unwrap().clone();
        match reply {
            Ok(title) => Ok(ResponseRecord {
                model: request.model.clone(),
                created_at: "2024-05-01T10:00:02Z".into(),
                response: title,
                done: true,
                done_reason: Some("stop".into()),
                context: Some(vec![42]),
                metrics: GenerationMetrics::default(),
            }),
            Err(error) => Err(ChatError::Transport(error)),
        }
    }
}

pub fn test_config() -> Config {
    Config::default()
}

pub fn engine_with(transport: Arc<ScriptedTransport>, config: &Config) -> ConversationEngine {
    ConversationEngine::with_transport(transport, config)
}

/// Wait for the next event matching `pred`, failing the test after a second.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<ChatEvent>, pred: F) -> ChatEvent
where
    F: Fn(&ChatEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_recorded(events: &mut broadcast::Receiver<ChatEvent>, id: SessionId) {
    wait_for(events, |event| {
        matches!(event, ChatEvent::SessionRecorded { session } if *session == id)
    })
    .await;
}
