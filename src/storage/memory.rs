use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{AgentError, Result};
use crate::storage::traits::{
    ActivityEntry, ActivityLogger, AnalysisRecord, AnalysisRecordStatus, PersistenceSink,
};
use crate::types::{ActivityStatus, AnalysisId, CombinedResult, PropertyData, UserId, WorkflowId};

/// Process-local activity log and analysis records.
#[derive(Clone)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<AnalysisId, AnalysisRecord>>>,
    activity: Arc<RwLock<Vec<ActivityEntry>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            activity: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    pub fn get_analysis_record(&self, analysis_id: AnalysisId) -> Result<Option<AnalysisRecord>> {
        Ok(read(&self.records)?.get(&analysis_id).cloned())
    }

    /// Activity events of one workflow, in the order they were logged.
    pub fn activity_for(&self, workflow_id: WorkflowId) -> Result<Vec<ActivityEntry>> {
        Ok(read(&self.activity)?
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| AgentError::Persistence("store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| AgentError::Persistence("store lock poisoned".to_string()))
}

#[async_trait]
impl ActivityLogger for InMemoryStore {
    async fn log_activity(
        &self,
        workflow_id: WorkflowId,
        agent_name: &str,
        status: ActivityStatus,
        payload: &Value,
    ) -> Result<()> {
        write(&self.activity)?.push(ActivityEntry {
            id: uuid::Uuid::new_v4(),
            workflow_id,
            agent_name: agent_name.to_string(),
            status,
            payload: payload.clone(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for InMemoryStore {
    async fn create_analysis_record(
        &self,
        property_data: &PropertyData,
        user_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<AnalysisId> {
        let analysis_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = AnalysisRecord {
            analysis_id,
            workflow_id,
            user_id,
            property_id: property_data.get("property_id").and_then(Value::as_i64),
            analysis_type: "comprehensive".to_string(),
            status: AnalysisRecordStatus::Processing,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        write(&self.records)?.insert(analysis_id, record);
        Ok(analysis_id)
    }

    async fn update_analysis_record(
        &self,
        analysis_id: AnalysisId,
        result: &CombinedResult,
    ) -> Result<()> {
        let mut records = write(&self.records)?;
        let record = records.get_mut(&analysis_id).ok_or_else(|| {
            AgentError::Persistence(format!("analysis record {} not found", analysis_id))
        })?;
        record.status = AnalysisRecordStatus::Completed;
        record.result = Some(result.clone());
        record.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageResult;
    use serde_json::json;

    #[tokio::test]
    async fn test_analysis_ids_are_sequential() {
        let store = InMemoryStore::new();
        let first = store
            .create_analysis_record(&json!({"property_id": 7}), 1, WorkflowId::new_v4())
            .await
            .unwrap();
        let second = store
            .create_analysis_record(&json!({}), 1, WorkflowId::new_v4())
            .await
            .unwrap();

        assert_eq!(second, first + 1);
        let record = store.get_analysis_record(first).unwrap().unwrap();
        assert_eq!(record.property_id, Some(7));
        assert_eq!(record.status, AnalysisRecordStatus::Processing);
    }

    #[tokio::test]
    async fn test_update_marks_record_completed() {
        let store = InMemoryStore::new();
        let id = store
            .create_analysis_record(&json!({}), 3, WorkflowId::new_v4())
            .await
            .unwrap();

        let stage = |name: &str| StageResult::new(name, 5.0, json!({}));
        let combined = CombinedResult::combine(
            stage("price_estimator"),
            stage("location_analyzer"),
            stage("deal_evaluator"),
        );
        store.update_analysis_record(id, &combined).await.unwrap();

        let record = store.get_analysis_record(id).unwrap().unwrap();
        assert_eq!(record.status, AnalysisRecordStatus::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.result.unwrap().combined_score, 5.0);
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let store = InMemoryStore::new();
        let stage = |name: &str| StageResult::new(name, 5.0, json!({}));
        let combined = CombinedResult::combine(stage("a"), stage("b"), stage("c"));
        let result = store.update_analysis_record(99, &combined).await;
        assert!(matches!(result, Err(AgentError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_activity_filtered_by_workflow() {
        let store = InMemoryStore::new();
        let a = WorkflowId::new_v4();
        let b = WorkflowId::new_v4();

        store
            .log_activity(a, "price_estimator", ActivityStatus::Started, &json!({}))
            .await
            .unwrap();
        store
            .log_activity(b, "price_estimator", ActivityStatus::Started, &json!({}))
            .await
            .unwrap();
        store
            .log_activity(a, "price_estimator", ActivityStatus::Completed, &json!({}))
            .await
            .unwrap();

        let entries = store.activity_for(a).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, ActivityStatus::Started);
        assert_eq!(entries[1].status, ActivityStatus::Completed);
    }
}
