use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AgentId, AgentStatus};

/// Advisory performance samples. Only `last_processing_ms` is measured; the
/// memory and cpu figures are whatever the agent last reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub last_processing_ms: u64,
    pub memory_usage_mb: f64,
    pub cpu_usage_pct: f64,
    pub processed_count: u64,
    pub error_count: u64,
}

/// Point-in-time view of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub metrics: AgentMetrics,
    pub queue_size: usize,
    pub active_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentStatusReport {
    Single(AgentSnapshot),
    All { agents: BTreeMap<String, AgentSnapshot> },
    NotFound { agent_name: String },
}

impl AgentStatusReport {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentStatusReport::NotFound { .. })
    }
}
