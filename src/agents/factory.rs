use std::sync::Arc;

use crate::agents::deal_evaluator::DealEvaluator;
use crate::agents::location_analyzer::LocationAnalyzer;
use crate::agents::price_estimator::PriceEstimator;
use crate::agents::retry::RetryPolicy;
use crate::agents::runtime::Agent;
use crate::error::Result;
use crate::providers::{DataSource, TextGenerator};

/// Builds the agent set an orchestrator registers at startup.
pub trait AgentFactory: Send + Sync {
    fn build(&self) -> Result<Vec<Agent>>;
}

impl<F> AgentFactory for F
where
    F: Fn() -> Result<Vec<Agent>> + Send + Sync,
{
    fn build(&self) -> Result<Vec<Agent>> {
        self()
    }
}

/// The three pipeline agents wired to shared collaborators.
pub struct DefaultAgentFactory {
    data: Arc<dyn DataSource>,
    llm: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    max_tokens: u32,
}

impl DefaultAgentFactory {
    pub fn new(
        data: Arc<dyn DataSource>,
        llm: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        max_tokens: u32,
    ) -> Self {
        Self {
            data,
            llm,
            retry,
            max_tokens,
        }
    }
}

impl AgentFactory for DefaultAgentFactory {
    fn build(&self) -> Result<Vec<Agent>> {
        Ok(vec![
            Agent::new(Box::new(PriceEstimator::new(
                self.data.clone(),
                self.llm.clone(),
                self.retry,
                self.max_tokens,
            ))),
            Agent::new(Box::new(LocationAnalyzer::new(self.data.clone(), self.retry))),
            Agent::new(Box::new(DealEvaluator::new(self.data.clone(), self.retry))),
        ])
    }
}
