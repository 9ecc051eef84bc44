use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::lifecycle::{WorkflowEvent, WorkflowStateMachine};
use crate::types::{AnalysisId, CombinedResult, UserId, Workflow, WorkflowId, WorkflowSnapshot};

/// Workflow entries keyed by id. Entries leave `Running` exactly once and
/// terminal entries are never modified again.
#[derive(Debug, Default)]
pub struct WorkflowTable {
    entries: DashMap<WorkflowId, Workflow>,
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_running(&self, workflow_id: WorkflowId, user_id: UserId) {
        self.entries
            .insert(workflow_id, Workflow::new(workflow_id, user_id));
    }

    pub fn get(&self, workflow_id: &WorkflowId) -> Option<WorkflowSnapshot> {
        self.entries.get(workflow_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<WorkflowSnapshot> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|w| w.start_time);
        all
    }

    pub fn set_analysis_id(&self, workflow_id: &WorkflowId, analysis_id: AnalysisId) -> Result<()> {
        let mut entry = self.running_entry(workflow_id)?;
        entry.analysis_id = Some(analysis_id);
        Ok(())
    }

    pub fn complete(&self, workflow_id: &WorkflowId, result: &CombinedResult) -> Result<()> {
        let mut entry = self.running_entry(workflow_id)?;
        entry.status = WorkflowStateMachine::transition(entry.status, WorkflowEvent::Completed)?;
        entry.end_time = Some(Utc::now());
        entry.combined_score = Some(result.combined_score);
        entry.recommendation = Some(result.recommendation);
        debug!(%workflow_id, "Workflow completed");
        Ok(())
    }

    pub fn fail(&self, workflow_id: &WorkflowId, error: &AgentError) -> Result<()> {
        let mut entry = self.running_entry(workflow_id)?;
        entry.status = WorkflowStateMachine::transition(entry.status, WorkflowEvent::Failed)?;
        entry.end_time = Some(Utc::now());
        entry.error = Some(error.to_string());
        debug!(%workflow_id, error = %error, "Workflow failed");
        Ok(())
    }

    /// Fails every entry still running. Returns how many were changed.
    pub fn fail_running(&self, error: &AgentError) -> usize {
        let running: Vec<WorkflowId> = self
            .entries
            .iter()
            .filter(|e| e.value().is_running())
            .map(|e| *e.key())
            .collect();

        running
            .iter()
            .filter(|id| self.fail(id, error).is_ok())
            .count()
    }

    fn running_entry(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, WorkflowId, Workflow>> {
        let entry = self
            .entries
            .get_mut(workflow_id)
            .ok_or(AgentError::WorkflowNotFound(*workflow_id))?;
        if !entry.is_running() {
            return Err(AgentError::InvalidStateTransition {
                from: entry.status.as_str().to_string(),
                to: "modified".to_string(),
            });
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StageResult, WorkflowStatus};
    use serde_json::json;

    fn result() -> CombinedResult {
        CombinedResult::combine(
            StageResult::new("price_estimator", 8.0, json!({})),
            StageResult::new("location_analyzer", 8.0, json!({})),
            StageResult::new("deal_evaluator", 8.0, json!({})),
        )
    }

    #[test]
    fn test_complete_records_score() {
        let table = WorkflowTable::new();
        let id = WorkflowId::new_v4();
        table.insert_running(id, 7);
        table.set_analysis_id(&id, 3).unwrap();
        table.complete(&id, &result()).unwrap();

        let snapshot = table.get(&id).unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Completed);
        assert_eq!(snapshot.analysis_id, Some(3));
        assert!(snapshot.end_time.is_some());
        assert!(snapshot.combined_score.is_some());
    }

    #[test]
    fn test_terminal_entries_are_frozen() {
        let table = WorkflowTable::new();
        let id = WorkflowId::new_v4();
        table.insert_running(id, 1);
        table.fail(&id, &AgentError::Validation("bedrooms".into())).unwrap();

        assert!(table.complete(&id, &result()).is_err());
        assert!(table.fail(&id, &AgentError::Shutdown).is_err());
        assert!(table.set_analysis_id(&id, 9).is_err());

        let snapshot = table.get(&id).unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Failed);
        assert!(snapshot.error.unwrap().contains("bedrooms"));
        assert_eq!(snapshot.analysis_id, None);
    }

    #[test]
    fn test_fail_running_skips_terminal() {
        let table = WorkflowTable::new();
        let done = WorkflowId::new_v4();
        let running = WorkflowId::new_v4();
        table.insert_running(done, 1);
        table.insert_running(running, 1);
        table.complete(&done, &result()).unwrap();

        assert_eq!(table.fail_running(&AgentError::Shutdown), 1);
        assert_eq!(table.get(&done).unwrap().status, WorkflowStatus::Completed);
        assert_eq!(table.get(&running).unwrap().status, WorkflowStatus::Failed);
        assert!(table.get(&WorkflowId::new_v4()).is_none());
    }

    #[test]
    fn test_unknown_workflow_is_not_found() {
        let table = WorkflowTable::new();
        let id = WorkflowId::new_v4();

        let err = table.fail(&id, &AgentError::Shutdown).unwrap_err();
        assert!(matches!(err, AgentError::WorkflowNotFound(missing) if missing == id));
        assert!(matches!(
            table.set_analysis_id(&id, 1),
            Err(AgentError::WorkflowNotFound(_))
        ));
        assert!(table.get(&id).is_none());
    }
}
