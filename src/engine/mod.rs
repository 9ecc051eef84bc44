pub mod orchestrator;
pub mod pipeline;
pub mod workflows;

pub use orchestrator::{Orchestrator, OrchestratorContext};
pub use pipeline::PipelineExecutor;
pub use workflows::WorkflowTable;
