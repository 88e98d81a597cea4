use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    RehabConsult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Intake,
    Interview,
    Plan,
}

impl FlowState {
    /// One-based step number shown by front ends.
    pub fn step(&self) -> u8 {
        match self {
            Self::Intake => 1,
            Self::Interview => 2,
            Self::Plan => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StartInterview,
    SubmitReply,
    RequestPlan,
    RegeneratePlan,
    ReturnToInterview,
    ReturnToIntake,
}

/// Facts about the session the engine needs to guard transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
    pub has_history: bool,
    pub has_user_reply: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AskFirstQuestion,
    AskFollowUp,
    GeneratePlan,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
