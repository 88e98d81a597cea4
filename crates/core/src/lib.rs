pub mod config;
pub mod conversation;
pub mod errors;
pub mod flows;
pub mod image;
pub mod intake;
pub mod prompts;
pub mod proxy;

pub use config::{
    ConfigError, ConfigOverrides, ConfigSource, LoadOptions, LogFormat, LoggingConfig,
    ResolvedConfig, RuntimeConfig,
};
pub use conversation::{
    build_messages, compose_user_message, normalize_history, pairs_to_log, render_transcript,
    strip_images, ChatMessage, ContentPart, HistoryInput, MessageContent, Role, TurnPair,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowState, FlowTransitionError,
    RehabConsultFlow, TransitionOutcome,
};
pub use image::{build_image_payload, ImageAttachment, ImagePayload, ImageWarning};
pub use intake::{format_intake, IntakeRecord, Symptom};
pub use proxy::ProxySettings;
