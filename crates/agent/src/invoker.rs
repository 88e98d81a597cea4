use rehabdesk_core::config::{LoadOptions, RuntimeConfig};
use rehabdesk_core::conversation::{render_transcript, strip_images, ChatMessage};
use rehabdesk_core::prompts::with_images_omitted;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{BackendConnector, BackendError, BackendRequest, ResponseEvent};

pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "No response received from the model.";
pub const MISSING_API_KEY_MESSAGE: &str =
    "Missing API key. Set ANTHROPIC_API_KEY or fill in api_key in config.local.yaml.";

const EVENT_BUFFER: usize = 32;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("{}", MISSING_API_KEY_MESSAGE)]
    MissingApiKey,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Turns a system prompt and message sequence into one backend call and
/// collects the streamed reply. One attempt per call, no timeout.
pub struct AgentInvoker<C> {
    connector: C,
    load_options: LoadOptions,
}

impl<C> AgentInvoker<C>
where
    C: BackendConnector,
{
    pub fn new(connector: C, load_options: LoadOptions) -> Self {
        Self { connector, load_options }
    }

    /// Config is resolved per call so file and environment edits apply to
    /// the next request without a restart.
    pub fn resolve_config(&self) -> RuntimeConfig {
        RuntimeConfig::load(self.load_options.clone())
    }

    pub async fn invoke(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        had_image: bool,
    ) -> Result<String, InvokeError> {
        let config = self.resolve_config();
        self.invoke_with_config(&config, system_prompt, messages, had_image).await
    }

    pub async fn invoke_with_config(
        &self,
        config: &RuntimeConfig,
        system_prompt: &str,
        messages: &[ChatMessage],
        had_image: bool,
    ) -> Result<String, InvokeError> {
        if !config.has_api_key() {
            warn!(event_name = "agent.invoke.missing_api_key", "no api key configured");
            return Err(InvokeError::MissingApiKey);
        }

        let prompt = if had_image {
            // The backend call is text-only; the image is dropped here.
            render_transcript(&with_images_omitted(system_prompt), &strip_images(messages))
        } else {
            render_transcript(system_prompt, messages)
        };

        let backend = self.connector.connect(config)?;
        let request = BackendRequest::new(prompt, config);
        info!(
            event_name = "agent.invoke.start",
            backend = backend.name(),
            model = %request.model,
            message_count = messages.len(),
            had_image,
            "invoking backend"
        );

        let (sender, mut receiver) = mpsc::channel::<ResponseEvent>(EVENT_BUFFER);
        let drain = async {
            let mut chunks = Vec::new();
            while let Some(event) = receiver.recv().await {
                if let Some(chunk) = event.into_chunk() {
                    chunks.push(chunk);
                }
            }
            chunks
        };
        let (outcome, chunks) = tokio::join!(backend.query(request, sender), drain);

        if let Err(error) = outcome {
            warn!(event_name = "agent.invoke.failed", error = %error, "backend call failed");
            return Err(error.into());
        }

        let output = chunks.concat().trim().to_string();
        debug!(
            event_name = "agent.invoke.complete",
            chunk_count = chunks.len(),
            output_chars = output.chars().count(),
            "backend call complete"
        );
        if output.is_empty() {
            return Ok(EMPTY_RESPONSE_PLACEHOLDER.to_string());
        }
        Ok(output)
    }
}
