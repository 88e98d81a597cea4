//! Conversation history bookkeeping and prompt assembly.
//!
//! History arrives either as a flat role/content log or as `[user, assistant]`
//! pairs. Both are normalized to [`TurnPair`]s, the most recent
//! [`HISTORY_WINDOW`] pairs are turned into [`ChatMessage`]s, and the result is
//! flattened into a single text transcript for the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::{ImagePayload, ImageWarning};

/// Paired turns that reach a prompt; older turns stay in the displayed history.
pub const HISTORY_WINDOW: usize = 6;

pub const BEGIN_INTERVIEW_PROMPT: &str =
    "Baseline information has been provided, please begin the interview.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image(ImagePayload),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text parts, trimmed. Image parts contribute nothing.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<String>()
                .trim()
                .to_string(),
        }
    }

    pub fn has_image(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(|part| matches!(part, ContentPart::Image(_))),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// One user turn and the assistant reply to it. Either half may be empty
/// padding when the source history was not strictly alternating.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnPair {
    pub user: String,
    pub assistant: String,
}

impl TurnPair {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self { user: user.into(), assistant: assistant.into() }
    }
}

/// The two history shapes accepted from a front end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryInput {
    Log(Vec<ChatMessage>),
    Pairs(Vec<(String, String)>),
}

impl Default for HistoryInput {
    fn default() -> Self {
        Self::Log(Vec::new())
    }
}

pub fn normalize_history(history: &HistoryInput) -> Vec<TurnPair> {
    match history {
        HistoryInput::Log(messages) => normalize_log(messages),
        HistoryInput::Pairs(pairs) => {
            pairs.iter().map(|(user, assistant)| TurnPair::new(user, assistant)).collect()
        }
    }
}

pub fn normalize_log(messages: &[ChatMessage]) -> Vec<TurnPair> {
    let mut normalized = Vec::new();
    let mut pending_user: Option<String> = None;

    for message in messages {
        let text = message.text();
        match message.role {
            Role::User => {
                if let Some(user) = pending_user.replace(text) {
                    normalized.push(TurnPair::new(user, ""));
                }
            }
            Role::Assistant => {
                let user = pending_user.take().unwrap_or_default();
                normalized.push(TurnPair::new(user, text));
            }
        }
    }

    if let Some(user) = pending_user {
        normalized.push(TurnPair::new(user, ""));
    }
    normalized
}

/// Inverse of [`normalize_log`]: empty halves are skipped.
pub fn pairs_to_log(pairs: &[TurnPair]) -> Vec<ChatMessage> {
    let mut log = Vec::with_capacity(pairs.len() * 2);
    for pair in pairs {
        if !pair.user.is_empty() {
            log.push(ChatMessage::user(pair.user.clone()));
        }
        if !pair.assistant.is_empty() {
            log.push(ChatMessage::assistant(pair.assistant.clone()));
        }
    }
    log
}

/// Builds the message sequence for one backend call from the recent history
/// and the new user turn.
pub fn build_messages(
    history: &[TurnPair],
    user_message: &str,
    image: Option<ImagePayload>,
) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages = pairs_to_log(&history[start..]);

    let content = match image {
        Some(payload) => MessageContent::Parts(vec![
            ContentPart::Text { text: user_message.to_string() },
            ContentPart::Image(payload),
        ]),
        None => MessageContent::Text(user_message.to_string()),
    };
    messages.push(ChatMessage { role: Role::User, content });

    if messages.first().is_some_and(|message| message.role == Role::Assistant) {
        messages.insert(0, ChatMessage::user(BEGIN_INTERVIEW_PROMPT));
    }
    messages
}

/// Wraps a request with the intake block, plus an image note when the upload
/// had to be skipped.
pub fn compose_user_message(
    intake_block: &str,
    request: &str,
    image_warning: Option<ImageWarning>,
) -> String {
    let mut message = format!("Athlete intake:\n{intake_block}\n\nRequest:\n{request}\n");
    if let Some(warning) = image_warning {
        message.push_str(&format!("\n\nImage note: {warning}"));
    }
    message
}

/// Replaces list-structured content with its concatenated text parts.
pub fn strip_images(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| match &message.content {
            MessageContent::Parts(_) => ChatMessage {
                role: message.role,
                content: MessageContent::Text(message.content.text()),
            },
            MessageContent::Text(_) => message.clone(),
        })
        .collect()
}

pub fn render_transcript(system_prompt: &str, messages: &[ChatMessage]) -> String {
    let mut lines =
        vec![system_prompt.trim().to_string(), String::new(), "Conversation:".to_string()];
    for message in messages {
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        lines.push(format!("{}: {text}", message.role.display_name()));
    }
    lines.push("Assistant:".to_string());
    lines.join("\n").trim().to_string()
}
