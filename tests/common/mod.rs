#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use dealflow::agents::{DEAL_EVALUATOR, LOCATION_ANALYZER, PRICE_ESTIMATOR};
use dealflow::config::OrchestratorConfig;
use dealflow::storage::InMemoryStore;
use dealflow::{Agent, AgentError, Capability, Orchestrator, Result, StageResult, WorkflowId, WorkflowSnapshot};

/// Test capability returning a fixed result, optionally held until a permit
/// is released.
pub struct StubCapability {
    name: &'static str,
    score: f64,
    output: Value,
    gate: Option<Arc<Semaphore>>,
    fail_with: Option<String>,
}

impl StubCapability {
    pub fn new(name: &'static str, score: f64, output: Value) -> Self {
        Self {
            name,
            score,
            output,
            gate: None,
            fail_with: None,
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Capability for StubCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn check_input(&self, _data: &Value) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn analyze(&self, data: &Value) -> Result<StageResult> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| AgentError::Shutdown)?;
        }
        if let Some(message) = &self.fail_with {
            return Err(AgentError::Validation(message.clone()));
        }
        let mut output = self.output.clone();
        let address = data
            .get("address")
            .or_else(|| data.get("property_data").and_then(|p| p.get("address")));
        output["echo_address"] = address.cloned().unwrap_or(Value::Null);
        Ok(StageResult::new(self.name, self.score, output))
    }
}

pub fn price_stub() -> StubCapability {
    StubCapability::new(PRICE_ESTIMATOR, 8.0, json!({"estimated_price": 425_000.0}))
}

pub fn location_stub() -> StubCapability {
    StubCapability::new(LOCATION_ANALYZER, 7.0, json!({"location_score": 7.0}))
}

pub fn deal_stub() -> StubCapability {
    StubCapability::new(DEAL_EVALUATOR, 9.0, json!({"deal_score": 9.0, "investment_strategy": "buy"}))
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval_ms: 10,
        shutdown_grace_ms: 200,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator_with(
    store: &InMemoryStore,
    config: OrchestratorConfig,
    build: impl Fn() -> Vec<Box<dyn Capability>> + Send + Sync + 'static,
) -> Orchestrator {
    let factory = move || -> Result<Vec<Agent>> { Ok(build().into_iter().map(Agent::new).collect()) };
    Orchestrator::new(
        factory,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config,
    )
}

pub fn property(address: &str) -> Value {
    json!({
        "address": address,
        "property_type": "single_family",
        "bedrooms": 3,
        "bathrooms": 2.0,
        "square_feet": 1500,
        "year_built": 1995,
        "city": "Austin",
        "state": "TX",
    })
}

pub async fn wait_for<F>(orchestrator: &Orchestrator, workflow_id: WorkflowId, done: F) -> WorkflowSnapshot
where
    F: Fn(&WorkflowSnapshot) -> bool,
{
    let wait = async {
        loop {
            if let Some(workflow) = orchestrator.get_workflow_status(&workflow_id) {
                if done(&workflow) {
                    return workflow;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("workflow did not reach the expected state")
}

pub async fn wait_terminal(orchestrator: &Orchestrator, workflow_id: WorkflowId) -> WorkflowSnapshot {
    wait_for(orchestrator, workflow_id, |w| w.status.is_terminal()).await
}
