use thiserror::Error;

use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome,
};

pub const NO_INTERVIEW_HISTORY_GUIDANCE: &str =
    "No interview yet. Go back to step 2 and complete the interview first.";
pub const NO_USER_REPLY_GUIDANCE: &str =
    "No interview answers yet. Go back to step 2 and answer the follow-up questions first.";

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct RehabConsultFlow;

impl FlowDefinition for RehabConsultFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::RehabConsult
    }

    fn initial_state(&self) -> FlowState {
        FlowState::Intake
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_rehab_consult(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<RehabConsultFlow> {
    fn default() -> Self {
        Self::new(RehabConsultFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: FlowState, missing_fields: Vec<String> },
    #[error("{}", NO_INTERVIEW_HISTORY_GUIDANCE)]
    NoInterviewHistory,
    #[error("{}", NO_USER_REPLY_GUIDANCE)]
    NoUserReply,
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

impl FlowTransitionError {
    /// Text a front end shows in place of the blocked step.
    pub fn guidance(&self) -> String {
        match self {
            Self::MissingRequiredFields { missing_fields, .. } => {
                required_fields_note(missing_fields)
            }
            Self::NoInterviewHistory => NO_INTERVIEW_HISTORY_GUIDANCE.to_string(),
            Self::NoUserReply => NO_USER_REPLY_GUIDANCE.to_string(),
            Self::InvalidTransition { .. } => self.to_string(),
        }
    }
}

pub fn required_fields_note(missing_fields: &[String]) -> String {
    format!("Please complete required fields: {}", missing_fields.join(", "))
}

fn transition_rehab_consult(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{AskFirstQuestion, AskFollowUp, GeneratePlan};
    use FlowEvent::{
        RegeneratePlan, RequestPlan, ReturnToIntake, ReturnToInterview, StartInterview,
        SubmitReply,
    };
    use FlowState::{Intake, Interview, Plan};

    let (to, actions) = match (current, event) {
        (Intake, StartInterview) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: current.clone(),
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (Interview, vec![AskFirstQuestion])
        }
        (Interview, SubmitReply) => (Interview, vec![AskFollowUp]),
        (Interview, RequestPlan) => {
            if !context.has_history {
                return Err(FlowTransitionError::NoInterviewHistory);
            }
            if !context.has_user_reply {
                return Err(FlowTransitionError::NoUserReply);
            }
            (Plan, vec![GeneratePlan])
        }
        (Plan, RegeneratePlan) => (Plan, vec![GeneratePlan]),
        (Plan, ReturnToInterview) => (Interview, Vec::new()),
        (Interview, ReturnToIntake) => (Intake, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{
        FlowDefinition, FlowEngine, FlowTransitionError, RehabConsultFlow,
        NO_USER_REPLY_GUIDANCE,
    };
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType};

    fn interviewed() -> FlowContext {
        FlowContext { has_history: true, has_user_reply: true, ..FlowContext::default() }
    }

    #[test]
    fn consult_flow_happy_path() {
        let engine = FlowEngine::new(RehabConsultFlow);
        let mut state = engine.initial_state();
        assert_eq!(state, FlowState::Intake);

        let started = engine
            .apply(&state, &FlowEvent::StartInterview, &FlowContext::default())
            .expect("intake -> interview");
        assert_eq!(started.actions, vec![FlowAction::AskFirstQuestion]);
        state = started.to;

        let reply = engine
            .apply(&state, &FlowEvent::SubmitReply, &interviewed())
            .expect("interview -> interview");
        assert_eq!(reply.to, FlowState::Interview);
        assert_eq!(reply.actions, vec![FlowAction::AskFollowUp]);

        let plan = engine
            .apply(&reply.to, &FlowEvent::RequestPlan, &interviewed())
            .expect("interview -> plan");
        assert_eq!(plan.to, FlowState::Plan);
        assert_eq!(plan.actions, vec![FlowAction::GeneratePlan]);

        let regenerated = engine
            .apply(&plan.to, &FlowEvent::RegeneratePlan, &interviewed())
            .expect("plan -> plan");
        assert_eq!(regenerated.actions, vec![FlowAction::GeneratePlan]);
    }

    #[test]
    fn back_navigation_runs_no_actions() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        let back = engine
            .apply(&FlowState::Plan, &FlowEvent::ReturnToInterview, &context)
            .expect("plan -> interview");
        assert_eq!(back.to, FlowState::Interview);
        assert!(back.actions.is_empty());

        let intake = engine
            .apply(&back.to, &FlowEvent::ReturnToIntake, &context)
            .expect("interview -> intake");
        assert_eq!(intake.to, FlowState::Intake);
        assert!(intake.actions.is_empty());
    }

    #[test]
    fn missing_required_fields_block_the_interview() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &FlowState::Intake,
                &FlowEvent::StartInterview,
                &FlowContext {
                    missing_required_fields: vec!["sport".to_owned(), "training goal".to_owned()],
                    ..FlowContext::default()
                },
            )
            .expect_err("must reject missing fields");

        assert!(matches!(
            &error,
            FlowTransitionError::MissingRequiredFields { state: FlowState::Intake, missing_fields }
                if missing_fields == &vec!["sport".to_owned(), "training goal".to_owned()]
        ));
        assert_eq!(error.guidance(), "Please complete required fields: sport, training goal");
    }

    #[test]
    fn plan_requires_history_then_a_user_reply() {
        let engine = FlowEngine::default();

        let empty = engine
            .apply(&FlowState::Interview, &FlowEvent::RequestPlan, &FlowContext::default())
            .expect_err("empty history");
        assert_eq!(empty, FlowTransitionError::NoInterviewHistory);

        let unanswered = engine
            .apply(
                &FlowState::Interview,
                &FlowEvent::RequestPlan,
                &FlowContext { has_history: true, ..FlowContext::default() },
            )
            .expect_err("no user reply");
        assert_eq!(unanswered, FlowTransitionError::NoUserReply);
        assert_eq!(unanswered.guidance(), NO_USER_REPLY_GUIDANCE);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::Intake, &FlowEvent::RequestPlan, &interviewed())
            .expect_err("intake cannot jump to plan");

        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::Intake,
                event: FlowEvent::RequestPlan
            }
        ));
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let events = [
            FlowEvent::StartInterview,
            FlowEvent::SubmitReply,
            FlowEvent::RequestPlan,
            FlowEvent::ReturnToInterview,
            FlowEvent::SubmitReply,
        ];

        let run = |engine: &FlowEngine<RehabConsultFlow>| {
            let mut state = engine.initial_state();
            let mut actions = Vec::new();
            for event in &events {
                let outcome =
                    engine.apply(&state, event, &interviewed()).expect("deterministic run");
                actions.push(outcome.actions);
                state = outcome.to;
            }
            (state, actions)
        };

        let first = run(&engine);
        let second = run(&engine);

        assert_eq!(first, second);
        assert_eq!(first.0, FlowState::Interview);
        assert_eq!(engine.flow_type(), FlowType::RehabConsult);
        assert_eq!(RehabConsultFlow.flow_type(), FlowType::RehabConsult);
    }
}
