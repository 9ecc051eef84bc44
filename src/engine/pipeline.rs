use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::agents::{DEAL_EVALUATOR, LOCATION_ANALYZER, PRICE_ESTIMATOR};
use crate::engine::orchestrator::OrchestratorContext;
use crate::error::{AgentError, Result};
use crate::types::{ActivityStatus, CombinedResult, PropertyData, StageResult, UserId, WorkflowId};

const PERSISTENCE: &str = "persistence";

/// Runs one workflow's price, location and deal stages, combines them, and
/// records the outcome on the workflow table and the persistence sink.
pub struct PipelineExecutor {
    context: Arc<OrchestratorContext>,
    workflow_id: WorkflowId,
    user_id: UserId,
    property_data: PropertyData,
}

impl PipelineExecutor {
    pub fn new(
        context: Arc<OrchestratorContext>,
        workflow_id: WorkflowId,
        user_id: UserId,
        property_data: PropertyData,
    ) -> Self {
        Self {
            context,
            workflow_id,
            user_id,
            property_data,
        }
    }

    /// Drives the workflow to `Completed` or `Failed`.
    pub async fn run(self) {
        let workflow_id = self.workflow_id;
        info!(%workflow_id, user_id = self.user_id, "Starting analysis workflow");

        match self.execute().await {
            Ok(result) => {
                if let Err(err) = self.context.workflows().complete(&workflow_id, &result) {
                    warn!(%workflow_id, error = %err, "Could not mark workflow completed");
                    return;
                }
                info!(
                    %workflow_id,
                    combined_score = result.combined_score,
                    recommendation = result.recommendation.as_str(),
                    "Workflow completed"
                );
            }
            Err(err) => {
                error!(%workflow_id, error = %err, "Workflow failed");
                if let Err(table_err) = self.context.workflows().fail(&workflow_id, &err) {
                    warn!(%workflow_id, error = %table_err, "Could not mark workflow failed");
                }
            }
        }
    }

    async fn execute(&self) -> Result<CombinedResult> {
        let sink = self.context.persistence();
        let analysis_id = self
            .guarded(
                PERSISTENCE,
                sink.create_analysis_record(&self.property_data, self.user_id, self.workflow_id),
            )
            .await?;
        self.context
            .workflows()
            .set_analysis_id(&self.workflow_id, analysis_id)?;

        let (price, location) = if self.context.config().concurrent_price_location {
            tokio::try_join!(
                self.stage(PRICE_ESTIMATOR, &self.property_data),
                self.stage(LOCATION_ANALYZER, &self.property_data),
            )?
        } else {
            let price = self.stage(PRICE_ESTIMATOR, &self.property_data).await?;
            let location = self.stage(LOCATION_ANALYZER, &self.property_data).await?;
            (price, location)
        };

        let deal_input = json!({
            "property_data": self.property_data,
            "price_estimate": price.output.get("estimated_price").cloned().unwrap_or(Value::Null),
            "location_score": location.output.get("location_score").cloned().unwrap_or(Value::Null),
        });
        let deal = self.stage(DEAL_EVALUATOR, &deal_input).await?;

        let combined = CombinedResult::combine(price, location, deal);
        self.guarded(PERSISTENCE, sink.update_analysis_record(analysis_id, &combined))
            .await?;

        Ok(combined)
    }

    async fn stage(&self, name: &str, input: &Value) -> Result<StageResult> {
        let agent = self
            .context
            .agent(name)
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))?;

        self.log(name, ActivityStatus::Started, input).await;

        match self.guarded(name, agent.process(input)).await {
            Ok(result) => {
                let payload = json!({
                    "score": result.score,
                    "duration_ms": result.duration_ms,
                    "output": result.output,
                });
                self.log(name, ActivityStatus::Completed, &payload).await;
                Ok(result)
            }
            Err(err) => {
                self.log(name, ActivityStatus::Failed, &json!({ "error": err.to_string() }))
                    .await;
                Err(err)
            }
        }
    }

    /// Bounds `future` by the stage timeout and abandons it when the
    /// orchestrator shuts down.
    async fn guarded<T>(&self, stage: &str, future: impl Future<Output = Result<T>>) -> Result<T> {
        let mut shutdown = self.context.shutdown_signal();
        if *shutdown.borrow_and_update() {
            return Err(AgentError::Shutdown);
        }

        let limit = self.context.config().stage_timeout();
        tokio::select! {
            outcome = tokio::time::timeout(limit, future) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    stage: stage.to_string(),
                    seconds: limit.as_secs(),
                }),
            },
            _ = shutdown.wait_for(|stopping| *stopping) => Err(AgentError::Shutdown),
        }
    }

    async fn log(&self, agent_name: &str, status: ActivityStatus, payload: &Value) {
        if let Err(err) = self
            .context
            .activity()
            .log_activity(self.workflow_id, agent_name, status, payload)
            .await
        {
            warn!(
                workflow_id = %self.workflow_id,
                agent = agent_name,
                status = status.as_str(),
                error = %err,
                "Failed to log activity"
            );
        }
    }
}
