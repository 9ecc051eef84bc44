use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{AgentStatusReport, MessageId, PropertyData, UserId, WorkflowId};

/// Everything the dispatch loop consumes from the orchestrator queue.
#[derive(Debug)]
pub enum Message {
    AnalysisRequest {
        workflow_id: WorkflowId,
        property_data: PropertyData,
        user_id: UserId,
        submitted_at: DateTime<Utc>,
    },
    AgentCommunication(AgentMessage),
    StatusRequest {
        agent_name: String,
        reply: Option<oneshot::Sender<AgentStatusReport>>,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::AnalysisRequest { .. } => "analysis_request",
            Message::AgentCommunication(_) => "agent_communication",
            Message::StatusRequest { .. } => "status_request",
        }
    }
}

/// Envelope for direct agent-to-agent traffic.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentMessage {
    pub id: MessageId,
    pub from_agent: String,
    pub to_agent: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(from_agent: impl Into<String>, to_agent: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::new_v4(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            payload,
            sent_at: Utc::now(),
        }
    }
}
