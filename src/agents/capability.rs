use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::StageResult;

/// What an agent variant contributes: input checks, the analysis itself and
/// optional startup/shutdown hooks. Status, metrics and messaging live in
/// [`crate::agents::Agent`].
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable registry name, e.g. `price_estimator`.
    fn name(&self) -> &str;

    fn agent_type(&self) -> &str {
        "llm"
    }

    /// Names the first missing or invalid input field. Logs, never fails.
    fn check_input(&self, data: &Value) -> std::result::Result<(), String>;

    fn validate_input(&self, data: &Value) -> bool {
        self.check_input(data).is_ok()
    }

    /// Only called with input that passed `check_input`.
    async fn analyze(&self, data: &Value) -> Result<StageResult>;

    /// Acquires whatever the variant needs before serving. An error aborts
    /// orchestrator startup.
    async fn startup(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Advisory `(memory_mb, cpu_pct)` sample, read after each analysis.
    fn resource_usage(&self) -> Option<(f64, f64)> {
        None
    }
}
