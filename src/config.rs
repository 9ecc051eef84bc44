use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::agents::RetryPolicy;
use crate::providers::{OllamaTextGenerator, OpenAiTextGenerator, TemplateTextGenerator, TextGenerator};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub llm: LlmConfig,
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How long the dispatch loop waits on the queue before re-checking for
    /// shutdown.
    pub poll_interval_ms: u64,
    pub stage_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    pub concurrent_price_location: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stage_timeout_secs: 30,
            shutdown_grace_ms: 5000,
            concurrent_price_location: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Never shorter than one second.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Template,
    OpenAi,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "template" => Ok(LlmProvider::Template),
            "openai" => Ok(LlmProvider::OpenAi),
            "ollama" => Ok(LlmProvider::Ollama),
            other => bail!("unknown LLM provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub model: String,
    pub ollama_url: Option<String>,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Template,
            openai_api_key: None,
            model: "gpt-4".to_string(),
            ollama_url: None,
            max_tokens: 500,
        }
    }
}

impl LlmConfig {
    pub fn text_generator(&self) -> Result<Arc<dyn TextGenerator>> {
        Ok(match self.provider {
            LlmProvider::Template => Arc::new(TemplateTextGenerator::new()),
            LlmProvider::OpenAi => {
                let key = self
                    .openai_api_key
                    .clone()
                    .context("OPENAI_API_KEY is required for the openai provider")?;
                Arc::new(OpenAiTextGenerator::new(key).with_model(self.model.clone()))
            }
            LlmProvider::Ollama => Arc::new(OllamaTextGenerator::new(
                self.ollama_url.clone(),
                Some(self.model.clone()),
            )),
        })
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default().normalized();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// The file at `path` (or defaults) with environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default().normalized(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn normalized(mut self) -> Self {
        if self.log_filter.trim().is_empty() {
            self.log_filter = "info".to_string();
        }
        self
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(provider) = var("DEALFLOW_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = var("DEALFLOW_MODEL") {
            self.llm.model = model;
        }
        if let Some(timeout) = var("DEALFLOW_AGENT_TIMEOUT") {
            self.orchestrator.stage_timeout_secs = timeout
                .parse()
                .context("DEALFLOW_AGENT_TIMEOUT must be a number of seconds")?;
        }
        if let Some(attempts) = var("DEALFLOW_RETRY_ATTEMPTS") {
            self.retry.max_retries = attempts
                .parse()
                .context("DEALFLOW_RETRY_ATTEMPTS must be a positive integer")?;
        }
        if let Some(filter) = var("DEALFLOW_LOG") {
            self.log_filter = filter;
        }
        Ok(())
    }
}
