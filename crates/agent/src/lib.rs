//! Agent Runtime - language-model calls behind the rehab consult
//!
//! This crate turns the deterministic consult flow from `rehabdesk-core` into
//! actual model conversations:
//! - Abstracts the model provider behind a streaming backend trait
//! - Talks to Anthropic-compatible Messages endpoints over HTTP
//! - Collects streamed replies into one answer per user-visible action
//! - Drives one athlete's intake, interview and plan steps
//!
//! # Architecture
//!
//! 1. **Backend** (`llm`) - `LlmBackend` emits `ResponseEvent`s into a channel
//! 2. **HTTP integration** (`anthropic`) - SSE streaming client, proxy aware
//! 3. **Invocation** (`invoker`) - per-call config, image stripping, drain
//! 4. **Session** (`session`) - flow engine gating plus conversation history
//!
//! # Safety Principle
//!
//! The model only writes questions and guidance text. Whether a step may run,
//! which fields are required and which symptoms are red flags are decided by
//! the core crate before any call is made.

pub mod anthropic;
pub mod invoker;
pub mod llm;
pub mod session;

pub use anthropic::{AnthropicBackend, AnthropicConnector};
pub use invoker::{AgentInvoker, InvokeError};
pub use llm::{BackendConnector, BackendError, BackendRequest, LlmBackend, ResponseEvent};
pub use session::{IntakeGate, Session, SessionError};
