use crate::config::ServerConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::time::Duration;
use tracing::debug;

/// Headers sent with every generate call.
pub const JSON_HEADERS: &[(&str, &str)] = &[("Content-Type", "application/json")];

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub context: Vec<i64>,
    pub stream: bool,
}

impl GenerateRequest {
    /// Build a request payload from borrowed inputs. Nothing is touched on the wire.
    pub fn new(model: &str, prompt: &str, context: &[i64], stream: bool) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            context: context.to_vec(),
            stream,
        }
    }

    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        JSON_HEADERS
    }
}

/// One JSON object from the generate endpoint. Streaming replies send one per line,
/// non-streaming replies send exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub model: String,
    pub created_at: String,
    pub response: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(flatten)]
    pub metrics: GenerationMetrics,
}

/// Timing and counter fields. Passed through, never used for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

/// Raw response body, chunked as it arrives off the socket.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// The HTTP seam. `OllamaClient` is the real implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a streaming request and hand back the body without decoding it.
    async fn open_stream(&self, request: &GenerateRequest) -> Result<ByteStream>;

    /// Send a non-streaming request and decode its single record.
    async fn generate(&self, request: &GenerateRequest) -> Result<ResponseRecord>;
}

/// How long a call may take before it fails as a transport error
#[derive(Debug, Clone, Copy)]
enum Deadline {
    /// Bound the whole request, body included
    Whole(Duration),
    /// Bound only the wait for response headers; the body is timed per chunk
    Headers(Duration),
}

/// reqwest-backed client for a local Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.generate_url(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, request: &GenerateRequest, deadline: Deadline) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&self.endpoint);
        for (name, value) in request.headers() {
            builder = builder.header(*name, *value);
        }
        if let Deadline::Whole(timeout) = deadline {
            builder = builder.timeout(timeout);
        }

        debug!(endpoint = %self.endpoint, model = %request.model, stream = request.stream, "sending generate request");
        let send = builder.json(request).send();
        let response = match deadline {
            Deadline::Whole(_) => send.await?,
            Deadline::Headers(wait) => tokio::time::timeout(wait, send)
                .await
                .map_err(|_| {
                    ChatError::Transport(format!(
                        "no response from server for {}s",
                        wait.as_secs()
                    ))
                })??,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for OllamaClient {
    async fn open_stream(&self, request: &GenerateRequest) -> Result<ByteStream> {
        let response = self.post(request, Deadline::Headers(self.idle_timeout)).await?;
        let idle = self.idle_timeout;
        let body = Box::pin(response.bytes_stream());

        // per-chunk idle timeout; total generation time is unbounded
        let stream = futures::stream::unfold(Some(body), move |state| async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk.to_vec()), Some(body))),
                Ok(Some(Err(err))) => Some((Err(ChatError::from(err)), None)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(ChatError::Transport(format!(
                        "no data from server for {}s",
                        idle.as_secs()
                    ))),
                    None,
                )),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ResponseRecord> {
        let response = self.post(request, Deadline::Whole(self.request_timeout)).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request, headers and body
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    return;
                }
            }
        }
    }

    /// Serve one connection: read the request, write `reply` if any, then keep the
    /// socket open without sending anything else.
    async fn stub_server(reply: Option<String>) -> ServerConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            if let Some(reply) = reply {
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        ServerConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 1,
            stream_idle_timeout_secs: 1,
            ..ServerConfig::default()
        }
    }

    fn fixed_reply(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    const RECORD: &str = r#"{"model":"llama3","created_at":"2024-05-01T10:00:00Z","response":"Greeting","done":true,"context":[4,2]}"#;

    #[test]
    fn request_carries_exactly_the_given_fields() {
        let context = vec![1, 2, 3];
        let request = GenerateRequest::new("llama3", "Hello", &context, true);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "llama3",
                "prompt": "Hello",
                "context": [1, 2, 3],
                "stream": true
            })
        );
        assert_eq!(context, vec![1, 2, 3]);
        assert_eq!(request.headers(), &[("Content-Type", "application/json")]);
    }

    #[test]
    fn empty_context_serializes_as_empty_array() {
        let request = GenerateRequest::new("llama3", "Hi", &[], false);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["context"], serde_json::json!([]));
        assert_eq!(body["stream"], serde_json::json!(false));
    }

    #[test]
    fn final_record_decodes_context_and_metrics() {
        let line = r#"{"model":"llama3","created_at":"2024-05-01T10:00:00Z","response":"","done":true,"done_reason":"stop","context":[7,8,9],"total_duration":5000,"eval_count":12}"#;
        let record: ResponseRecord = serde_json::from_str(line).unwrap();

        assert!(record.done);
        assert_eq!(record.done_reason.as_deref(), Some("stop"));
        assert_eq!(record.context, Some(vec![7, 8, 9]));
        assert_eq!(record.metrics.total_duration, Some(5000));
        assert_eq!(record.metrics.eval_count, Some(12));
        assert_eq!(record.metrics.load_duration, None);
    }

    #[test]
    fn record_missing_required_field_is_rejected() {
        let line = r#"{"model":"llama3","created_at":"x","done":false}"#;
        assert!(serde_json::from_str::<ResponseRecord>(line).is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ServerConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            ..ServerConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Hello", &[], true);

        let err = client.open_stream(&request).await.err().unwrap();
        assert!(err.is_transport(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn silent_server_times_out_before_headers() {
        let config = stub_server(None).await;
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Hello", &[], true);

        let outcome = tokio::time::timeout(Duration::from_secs(5), client.open_stream(&request))
            .await
            .expect("open_stream should give up on its own");
        let err = outcome.err().unwrap();
        assert!(matches!(err, ChatError::Transport(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn stream_that_goes_silent_times_out() {
        let line = format!("{}\n", RECORD.replace("true", "false"));
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{line}\r\n",
            line.len()
        );
        let config = stub_server(Some(reply)).await;
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Hello", &[], true);

        let mut body = client.open_stream(&request).await.unwrap();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, line.as_bytes());

        let next = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("idle timeout should fire");
        assert!(matches!(next, Some(Err(ChatError::Transport(_)))));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn error_status_carries_code_and_body() {
        let config = stub_server(Some(fixed_reply(
            "500 Internal Server Error",
            "model not found",
        )))
        .await;
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Hello", &[], true);

        let err = client.open_stream(&request).await.err().unwrap();
        match err {
            ChatError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn generate_decodes_single_record() {
        let config = stub_server(Some(fixed_reply("200 OK", RECORD))).await;
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Title this", &[], false);

        let record = client.generate(&request).await.unwrap();
        assert_eq!(record.response, "Greeting");
        assert!(record.done);
        assert_eq!(record.context, Some(vec![4, 2]));
    }

    #[tokio::test]
    async fn generate_rejects_malformed_body() {
        let config = stub_server(Some(fixed_reply("200 OK", "not json"))).await;
        let client = OllamaClient::new(&config).unwrap();
        let request = GenerateRequest::new("llama3", "Title this", &[], false);

        let err = client.generate(&request).await.unwrap_err();
        assert!(matches!(err, ChatError::Json(_)), "unexpected error: {err}");
    }
}
