use async_trait::async_trait;
use serde_json::json;

use crate::error::{AgentError, Result};
use crate::providers::llm::TextGenerator;

/// Local model served by Ollama.
pub struct OllamaTextGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaTextGenerator {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.unwrap_or_else(|| "llama3.1".to_string()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaTextGenerator {
    async fn generate_text(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": { "num_predict": max_tokens },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::TransientUpstream(format!(
                "Ollama returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["response"]
            .as_str()
            .ok_or_else(|| AgentError::TransientUpstream("Invalid Ollama response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_generator_creation() {
        let generator = OllamaTextGenerator::new(None, Some("llama3.1".to_string()));
        assert_eq!(generator.model, "llama3.1");
        assert_eq!(generator.base_url, "http://localhost:11434");
    }
}
