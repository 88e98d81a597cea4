pub mod engine;
pub mod states;

pub use engine::{
    required_fields_note, FlowDefinition, FlowEngine, FlowTransitionError, RehabConsultFlow,
};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome};
