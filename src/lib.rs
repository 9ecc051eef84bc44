pub mod agents;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod providers;
pub mod storage;
pub mod types;

pub use agents::{retry_operation, Agent, AgentFactory, Capability, DefaultAgentFactory, RetryPolicy};
pub use config::Config;
pub use engine::{Orchestrator, PipelineExecutor, WorkflowTable};
pub use error::{AgentError, Result};
pub use types::*;
