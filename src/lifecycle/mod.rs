pub mod state_machine;

pub use state_machine::{AgentStateMachine, LifecycleEvent, WorkflowEvent, WorkflowStateMachine};
