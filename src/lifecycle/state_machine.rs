use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::types::{AgentStatus, WorkflowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Startup,
    ProcessingStarted,
    ProcessingSucceeded,
    ProcessingFailed,
    Shutdown,
}

pub struct AgentStateMachine;

impl AgentStateMachine {
    pub fn transition(current: AgentStatus, event: LifecycleEvent) -> Result<AgentStatus> {
        let next = match (current, event) {
            (AgentStatus::Idle | AgentStatus::Error, LifecycleEvent::Startup) => AgentStatus::Idle,
            (AgentStatus::Busy, LifecycleEvent::Startup) => AgentStatus::Busy,

            (
                AgentStatus::Idle | AgentStatus::Busy | AgentStatus::Error,
                LifecycleEvent::ProcessingStarted,
            ) => AgentStatus::Busy,
            (AgentStatus::Busy, LifecycleEvent::ProcessingSucceeded) => AgentStatus::Idle,
            (AgentStatus::Busy, LifecycleEvent::ProcessingFailed) => AgentStatus::Error,

            (_, LifecycleEvent::Shutdown) => AgentStatus::Offline,

            _ => {
                return Err(AgentError::InvalidStateTransition {
                    from: current.as_str().to_string(),
                    to: format!("{:?}", event),
                });
            }
        };

        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Completed,
    Failed,
}

/// Workflows only move forward: `Running -> Completed | Failed`.
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    pub fn transition(current: WorkflowStatus, event: WorkflowEvent) -> Result<WorkflowStatus> {
        match (current, event) {
            (WorkflowStatus::Running, WorkflowEvent::Completed) => Ok(WorkflowStatus::Completed),
            (WorkflowStatus::Running, WorkflowEvent::Failed) => Ok(WorkflowStatus::Failed),
            _ => Err(AgentError::InvalidStateTransition {
                from: current.as_str().to_string(),
                to: format!("{:?}", event),
            }),
        }
    }
}
