use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnalysisId, Recommendation, UserId, WorkflowId, WorkflowStatus};

/// Execution state of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    pub user_id: UserId,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub analysis_id: Option<AnalysisId>,
    pub error: Option<String>,
    pub combined_score: Option<f64>,
    pub recommendation: Option<Recommendation>,
}

/// What callers see when polling a workflow; a detached copy of the entry.
pub type WorkflowSnapshot = Workflow;

impl Workflow {
    pub fn new(workflow_id: WorkflowId, user_id: UserId) -> Self {
        Self {
            workflow_id,
            user_id,
            status: WorkflowStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            analysis_id: None,
            error: None,
            combined_score: None,
            recommendation: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }
}
