use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{ActivityStatus, AnalysisId, CombinedResult, PropertyData, UserId, WorkflowId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: uuid::Uuid,
    pub workflow_id: WorkflowId,
    pub agent_name: String,
    pub status: ActivityStatus,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisRecordStatus {
    Processing,
    Completed,
}

/// Durable analysis record as the persistence collaborator keeps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analysis_id: AnalysisId,
    pub workflow_id: WorkflowId,
    pub user_id: UserId,
    pub property_id: Option<i64>,
    pub analysis_type: String,
    pub status: AnalysisRecordStatus,
    pub result: Option<CombinedResult>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Sink for per-stage `started` / `completed` / `failed` events. Callers treat
/// it as fire-and-forget: an error here is logged, never propagated.
#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn log_activity(
        &self,
        workflow_id: WorkflowId,
        agent_name: &str,
        status: ActivityStatus,
        payload: &Value,
    ) -> Result<()>;
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn create_analysis_record(
        &self,
        property_data: &PropertyData,
        user_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<AnalysisId>;

    async fn update_analysis_record(
        &self,
        analysis_id: AnalysisId,
        result: &CombinedResult,
    ) -> Result<()>;
}
