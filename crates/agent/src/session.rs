//! One athlete's consult: intake gate, interview turns and the final plan.
//!
//! The flow engine decides whether a step is allowed and which action it runs;
//! the session performs the backend call and only commits the new state once
//! the call has produced a reply.

use rehabdesk_core::conversation::{
    build_messages, compose_user_message, normalize_log, ChatMessage, Role,
};
use rehabdesk_core::errors::{ApplicationError, DomainError};
use rehabdesk_core::flows::{
    required_fields_note, FlowAction, FlowContext, FlowEngine, FlowEvent, FlowState,
    FlowTransitionError, RehabConsultFlow, TransitionOutcome,
};
use rehabdesk_core::image::build_image_payload;
use rehabdesk_core::intake::{format_intake, IntakeRecord};
use rehabdesk_core::prompts::{
    follow_up_request, plan_request, system_prompt, FIRST_QUESTION_REQUEST,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::invoker::{AgentInvoker, InvokeError, MISSING_API_KEY_MESSAGE};
use crate::llm::BackendConnector;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeGate {
    pub can_start: bool,
    pub missing_fields: Vec<&'static str>,
    pub note: Option<String>,
}

impl IntakeGate {
    pub fn evaluate(intake: &IntakeRecord) -> Self {
        let missing_fields = intake.missing_required_fields();
        if missing_fields.is_empty() {
            return Self { can_start: true, missing_fields, note: None };
        }
        let labels: Vec<String> = missing_fields.iter().map(|label| label.to_string()).collect();
        Self { can_start: false, note: Some(required_fields_note(&labels)), missing_fields }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl SessionError {
    /// Guidance for blocked steps; `None` for backend failures.
    pub fn guidance(&self) -> Option<String> {
        match self {
            Self::Flow(error) => Some(error.guidance()),
            Self::Invoke(_) => None,
        }
    }
}

impl From<SessionError> for ApplicationError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
            SessionError::Invoke(InvokeError::MissingApiKey) => {
                Self::Configuration(MISSING_API_KEY_MESSAGE.to_string())
            }
            SessionError::Invoke(InvokeError::Backend(error)) => Self::Integration(error.to_string()),
        }
    }
}

pub struct Session<C> {
    id: Uuid,
    invoker: AgentInvoker<C>,
    engine: FlowEngine<RehabConsultFlow>,
    state: FlowState,
    history: Vec<ChatMessage>,
    plan: Option<String>,
}

impl<C> Session<C>
where
    C: BackendConnector,
{
    pub fn new(invoker: AgentInvoker<C>) -> Self {
        let engine = FlowEngine::default();
        Self {
            id: Uuid::new_v4(),
            invoker,
            state: engine.initial_state(),
            engine,
            history: Vec::new(),
            plan: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Full displayed history; only the recent window reaches a prompt.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn intake_gate(&self, intake: &IntakeRecord) -> IntakeGate {
        IntakeGate::evaluate(intake)
    }

    /// Step 1 to 2. Replaces the history with the first interview question.
    pub async fn start_interview(&mut self, intake: &IntakeRecord) -> Result<String, SessionError> {
        let context = FlowContext {
            missing_required_fields: intake
                .missing_required_fields()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            ..self.flow_context()
        };
        let reply = self.run(FlowEvent::StartInterview, context, intake, "").await?;
        Ok(reply.unwrap_or_default())
    }

    /// Blank input is a no-op and returns `Ok(None)` without a backend call.
    pub async fn send_message(
        &mut self,
        message: &str,
        intake: &IntakeRecord,
    ) -> Result<Option<String>, SessionError> {
        if message.trim().is_empty() {
            return Ok(None);
        }
        let context = self.flow_context();
        self.run(FlowEvent::SubmitReply, context, intake, message).await
    }

    pub async fn generate_plan(&mut self, intake: &IntakeRecord) -> Result<String, SessionError> {
        let context = self.flow_context();
        let reply = self.run(FlowEvent::RequestPlan, context, intake, "").await?;
        Ok(reply.unwrap_or_default())
    }

    pub async fn regenerate_plan(&mut self, intake: &IntakeRecord) -> Result<String, SessionError> {
        let context = self.flow_context();
        let reply = self.run(FlowEvent::RegeneratePlan, context, intake, "").await?;
        Ok(reply.unwrap_or_default())
    }

    pub fn back_to_interview(&mut self) -> Result<(), SessionError> {
        let outcome = self.transition(&FlowEvent::ReturnToInterview, &self.flow_context())?;
        self.state = outcome.to;
        Ok(())
    }

    /// History and plan are kept; the intake can be edited and resubmitted.
    pub fn back_to_intake(&mut self) -> Result<(), SessionError> {
        let outcome = self.transition(&FlowEvent::ReturnToIntake, &self.flow_context())?;
        self.state = outcome.to;
        Ok(())
    }

    fn flow_context(&self) -> FlowContext {
        FlowContext {
            missing_required_fields: Vec::new(),
            has_history: !self.history.is_empty(),
            has_user_reply: self
                .history
                .iter()
                .any(|message| message.role == Role::User && !message.text().is_empty()),
        }
    }

    fn transition(
        &self,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, SessionError> {
        match self.engine.apply(&self.state, event, context) {
            Ok(outcome) => {
                info!(
                    event_name = "session.transition_applied",
                    session_id = %self.id,
                    from = ?outcome.from,
                    to = ?outcome.to,
                    event = ?outcome.event,
                    "step transition applied"
                );
                Ok(outcome)
            }
            Err(error) => {
                warn!(
                    event_name = "session.transition_rejected",
                    session_id = %self.id,
                    state = ?self.state,
                    event = ?event,
                    error = %error,
                    "step transition rejected"
                );
                Err(error.into())
            }
        }
    }

    async fn run(
        &mut self,
        event: FlowEvent,
        context: FlowContext,
        intake: &IntakeRecord,
        answer: &str,
    ) -> Result<Option<String>, SessionError> {
        let outcome = self.transition(&event, &context)?;

        let mut last_reply = None;
        for action in &outcome.actions {
            let reply = match action {
                FlowAction::AskFirstQuestion => {
                    let reply = self.respond(FIRST_QUESTION_REQUEST, &[], intake).await?;
                    self.history = vec![ChatMessage::assistant(reply.clone())];
                    reply
                }
                FlowAction::AskFollowUp => {
                    let history = self.history.clone();
                    let reply = self.respond(&follow_up_request(answer), &history, intake).await?;
                    self.history.push(ChatMessage::user(answer));
                    self.history.push(ChatMessage::assistant(reply.clone()));
                    reply
                }
                FlowAction::GeneratePlan => {
                    let history = self.history.clone();
                    let reply = self.respond(&plan_request(intake), &history, intake).await?;
                    self.plan = Some(reply.clone());
                    reply
                }
            };
            last_reply = Some(reply);
        }

        self.state = outcome.to;
        Ok(last_reply)
    }

    /// One backend round trip for `request` on top of `history`.
    async fn respond(
        &self,
        request: &str,
        history: &[ChatMessage],
        intake: &IntakeRecord,
    ) -> Result<String, SessionError> {
        let config = self.invoker.resolve_config();
        let attachment = build_image_payload(intake.image_path.as_deref(), config.max_image_bytes);
        let user_message =
            compose_user_message(&format_intake(intake), request, attachment.warning());
        let had_image = attachment.payload().is_some();
        let messages = build_messages(&normalize_log(history), &user_message, attachment.into_payload());
        let system = system_prompt(&config.response_language);

        match self.invoker.invoke_with_config(&config, &system, &messages, had_image).await {
            Ok(reply) => Ok(reply),
            Err(InvokeError::MissingApiKey) => {
                warn!(
                    event_name = "session.missing_api_key",
                    session_id = %self.id,
                    "showing configuration hint instead of a model reply"
                );
                Ok(MISSING_API_KEY_MESSAGE.to_string())
            }
            Err(error) => Err(error.into()),
        }
    }
}
