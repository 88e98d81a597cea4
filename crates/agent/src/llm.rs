use async_trait::async_trait;
use rehabdesk_core::config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capabilities the backend may use while answering.
pub const ALLOWED_TOOLS: [&str; 1] = ["Skill"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub allowed_tools: Vec<String>,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>, config: &RuntimeConfig) -> Self {
        Self {
            prompt: prompt.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            allowed_tools: ALLOWED_TOOLS.iter().map(|tool| tool.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub text: Option<String>,
}

impl TextBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContent {
    Text(String),
    Blocks(Vec<TextBlock>),
}

/// One item of backend output. Backends emit any of the three shapes; each
/// normalizes to at most one text chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEvent {
    Plain(String),
    Content { content: EventContent },
    Text { text: String },
}

impl ResponseEvent {
    /// Validates a loosely-typed event. Shapes that carry no text yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn into_chunk(self) -> Option<String> {
        match self {
            Self::Plain(text) | Self::Text { text } => Some(text),
            Self::Content { content: EventContent::Text(text) } => Some(text),
            Self::Content { content: EventContent::Blocks(blocks) } => {
                let parts: Vec<String> = blocks.into_iter().filter_map(|block| block.text).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.concat())
                }
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend configuration invalid: {0}")]
    Configuration(String),
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
    #[error("backend reported an error: {0}")]
    Upstream(String),
}

/// A language-model backend that streams its answer as [`ResponseEvent`]s.
/// Dropping the sender marks the end of the stream.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(
        &self,
        request: BackendRequest,
        events: mpsc::Sender<ResponseEvent>,
    ) -> Result<(), BackendError>;
}

/// Builds a backend from an explicit config snapshot.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, config: &RuntimeConfig) -> Result<Box<dyn LlmBackend>, BackendError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BackendRequest, EventContent, ResponseEvent, TextBlock};
    use rehabdesk_core::config::RuntimeConfig;

    #[test]
    fn event_shapes_are_recognized() {
        assert_eq!(
            ResponseEvent::from_value(json!("plain chunk")),
            Some(ResponseEvent::Plain("plain chunk".to_string()))
        );
        assert_eq!(
            ResponseEvent::from_value(json!({ "content": "whole answer" })),
            Some(ResponseEvent::Content { content: EventContent::Text("whole answer".to_string()) })
        );
        assert_eq!(
            ResponseEvent::from_value(json!({ "text": "delta" })),
            Some(ResponseEvent::Text { text: "delta".to_string() })
        );
    }

    #[test]
    fn content_takes_precedence_over_text() {
        let event = ResponseEvent::from_value(json!({ "content": "c", "text": "t" }))
            .expect("event");
        assert_eq!(event.into_chunk().as_deref(), Some("c"));
    }

    #[test]
    fn non_text_content_falls_back_to_text_field() {
        let event =
            ResponseEvent::from_value(json!({ "content": 42, "text": "t" })).expect("event");
        assert_eq!(event.into_chunk().as_deref(), Some("t"));
    }

    #[test]
    fn blocks_without_text_are_skipped() {
        let event = ResponseEvent::from_value(json!({
            "content": [
                { "type": "text", "text": "Ice " },
                { "type": "tool_use", "name": "Skill" },
                { "type": "text", "text": "and rest." }
            ]
        }))
        .expect("event");
        assert_eq!(event.into_chunk().as_deref(), Some("Ice and rest."));

        let empty = ResponseEvent::Content {
            content: EventContent::Blocks(vec![TextBlock::default()]),
        };
        assert_eq!(empty.into_chunk(), None);
    }

    #[test]
    fn shapes_without_text_are_rejected() {
        assert_eq!(ResponseEvent::from_value(json!({ "type": "message_stop" })), None);
        assert_eq!(ResponseEvent::from_value(json!(17)), None);
    }

    #[test]
    fn request_carries_model_limits_and_allow_list() {
        let config = RuntimeConfig::default();
        let request = BackendRequest::new("prompt", &config);

        assert_eq!(request.model, config.model);
        assert_eq!(request.max_tokens, config.max_tokens);
        assert_eq!(request.allowed_tools, vec!["Skill".to_string()]);
    }
}
