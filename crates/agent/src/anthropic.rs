//! Anthropic-compatible Messages API backend.
//!
//! Sends the flattened transcript as a single user message with streaming
//! enabled and forwards text deltas as they arrive. Servers that ignore
//! `stream` and answer with a plain JSON body are handled too.

use async_trait::async_trait;
use rehabdesk_core::config::RuntimeConfig;
use rehabdesk_core::proxy::ProxySettings;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Proxy, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::llm::{
    BackendConnector, BackendError, BackendRequest, EventContent, LlmBackend, ResponseEvent,
    TextBlock,
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";

pub struct AnthropicBackend {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl AnthropicBackend {
    pub fn new(config: &RuntimeConfig, proxy: &ProxySettings) -> Result<Self, BackendError> {
        let client = build_client(proxy)?;
        Ok(Self {
            client,
            endpoint: messages_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn query(
        &self,
        request: BackendRequest,
        events: mpsc::Sender<ResponseEvent>,
    ) -> Result<(), BackendError> {
        // The Messages API has no notion of a tool allow-list without tool
        // definitions; none are declared, so the allow-list only bounds what
        // other backends may expose.
        debug!(
            event_name = "agent.backend.request",
            backend = self.name(),
            model = %request.model,
            max_tokens = request.max_tokens,
            allowed_tools = ?request.allowed_tools,
            prompt_chars = request.prompt.chars().count(),
            "sending messages request"
        );

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            stream: true,
            messages: vec![WireMessage { role: "user", content: &request.prompt }],
        };

        let mut response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|error| BackendError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, &body_text));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        if !is_event_stream {
            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|error| BackendError::Decode(error.to_string()))?;
            forward(&events, ResponseEvent::Content { content: EventContent::Blocks(parsed.content) })
                .await;
            return Ok(());
        }

        let mut decoder = SseDecoder::default();
        while let Some(chunk) =
            response.chunk().await.map_err(|error| BackendError::Transport(error.to_string()))?
        {
            for data in decoder.push(&chunk) {
                match parse_stream_data(&data)? {
                    StreamItem::Delta(text) => {
                        if !forward(&events, ResponseEvent::Text { text }).await {
                            return Ok(());
                        }
                    }
                    StreamItem::Stop => return Ok(()),
                    StreamItem::Ignore => {}
                }
            }
        }
        Ok(())
    }
}

/// Connects [`AnthropicBackend`]s with a fixed set of proxy endpoints.
#[derive(Clone, Debug, Default)]
pub struct AnthropicConnector {
    proxy: ProxySettings,
}

impl AnthropicConnector {
    pub fn new(proxy: ProxySettings) -> Self {
        Self { proxy }
    }

    pub fn from_env() -> Self {
        Self::new(ProxySettings::from_env())
    }
}

impl BackendConnector for AnthropicConnector {
    fn connect(&self, config: &RuntimeConfig) -> Result<Box<dyn LlmBackend>, BackendError> {
        Ok(Box::new(AnthropicBackend::new(config, &self.proxy)?))
    }
}

pub fn messages_endpoint(base_url: &str) -> String {
    format!("{}{MESSAGES_PATH}", base_url.trim().trim_end_matches('/'))
}

fn build_client(proxy: &ProxySettings) -> Result<Client, BackendError> {
    let mut builder = Client::builder().no_proxy();

    if let Some(url) = proxy.http.as_deref() {
        builder = builder.proxy(Proxy::http(url).map_err(|error| invalid_proxy(url, error))?);
    }
    if let Some(url) = proxy.https.as_deref() {
        builder = builder.proxy(Proxy::https(url).map_err(|error| invalid_proxy(url, error))?);
    }
    if let Some(url) = proxy.all.as_deref() {
        builder = builder.proxy(Proxy::all(url).map_err(|error| invalid_proxy(url, error))?);
    }

    builder.build().map_err(|error| BackendError::Configuration(error.to_string()))
}

fn invalid_proxy(url: &str, error: reqwest::Error) -> BackendError {
    BackendError::Configuration(format!("invalid proxy `{url}`: {error}"))
}

/// Returns `false` once the receiving side has gone away.
async fn forward(events: &mpsc::Sender<ResponseEvent>, event: ResponseEvent) -> bool {
    if events.send(event).await.is_err() {
        debug!(event_name = "agent.backend.receiver_closed", "response receiver dropped");
        return false;
    }
    true
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<TextBlock>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn map_http_error(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    BackendError::Http { status: status.as_u16(), message }
}

/// Splits a byte stream into the payloads of its `data:` lines. Partial lines
/// are buffered until the rest arrives.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let trimmed = line.trim();
            if let Some(data) = trimmed.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamItem {
    Delta(String),
    Stop,
    Ignore,
}

fn parse_stream_data(data: &str) -> Result<StreamItem, BackendError> {
    if data == "[DONE]" {
        return Ok(StreamItem::Stop);
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(error) => {
            warn!(
                event_name = "agent.backend.bad_frame",
                error = %error,
                "skipping undecodable stream frame"
            );
            return Ok(StreamItem::Ignore);
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(value
            .get("delta")
            .and_then(|delta| delta.get("text"))
            .and_then(Value::as_str)
            .map(|text| StreamItem::Delta(text.to_string()))
            .unwrap_or(StreamItem::Ignore)),
        Some("message_stop") => Ok(StreamItem::Stop),
        Some("error") => {
            let message = value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error");
            Err(BackendError::Upstream(message.to_string()))
        }
        _ => Ok(StreamItem::Ignore),
    }
}
