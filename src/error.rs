use thiserror::Error;

use crate::types::WorkflowId;

/// Errors raised by agents, the orchestrator and the pipeline executor.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or malformed input fields. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A data or text-generation service failed. Retried by `retry_operation`.
    #[error("upstream service failed: {0}")]
    TransientUpstream(String),

    #[error("agent {0} is offline")]
    Offline(String),

    #[error("message channel closed: {0}")]
    ChannelClosed(String),

    #[error("orchestrator is shutting down")]
    Shutdown,

    #[error("stage {stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::TransientUpstream(_) | AgentError::Timeout { .. }
        )
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::TransientUpstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
