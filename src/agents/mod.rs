pub mod capability;
pub mod deal_evaluator;
pub mod factory;
mod fields;
pub mod location_analyzer;
pub mod price_estimator;
pub mod retry;
pub mod runtime;

pub use capability::Capability;
pub use deal_evaluator::DealEvaluator;
pub use factory::{AgentFactory, DefaultAgentFactory};
pub use location_analyzer::LocationAnalyzer;
pub use price_estimator::PriceEstimator;
pub use retry::{retry_operation, RetryPolicy};
pub use runtime::Agent;

pub const PRICE_ESTIMATOR: &str = "price_estimator";
pub const LOCATION_ANALYZER: &str = "location_analyzer";
pub const DEAL_EVALUATOR: &str = "deal_evaluator";
