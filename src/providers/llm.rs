use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Remote or local text generation. Slow and allowed to fail; agents wrap
/// every call in `retry_operation`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You are a real estate analyst. Answer concisely and include figures when asked for them.";

#[derive(Debug, Clone)]
pub struct OpenAiTextGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

impl OpenAiTextGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate_text(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            max_tokens: Some(max_tokens),
            temperature: 0.7,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            return Err(AgentError::TransientUpstream(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let result: OpenAiResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| AgentError::TransientUpstream("No choices in response".to_string()))
    }
}

/// Offline generator that answers from keyword templates. Used when no model
/// is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct TemplateTextGenerator {
    fixed: Option<String>,
}

impl TemplateTextGenerator {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            fixed: Some(response.into()),
        }
    }

    fn template_for(prompt: &str) -> &'static str {
        let prompt = prompt.to_lowercase();
        if prompt.contains("price") && prompt.contains("estimate") {
            "Based on comparable properties and market analysis, the estimated price is $425,000."
        } else if prompt.contains("location") {
            "The location indicates a good neighborhood with strong community features and convenient access to amenities."
        } else if prompt.contains("market") && prompt.contains("trend") {
            "Current market trends show stable growth with moderate appreciation potential in this area."
        } else if prompt.contains("risk") {
            "Risk assessment indicates moderate risk factors with manageable mitigation strategies available."
        } else if prompt.contains("investment") || prompt.contains("strategy") {
            "This property shows moderate investment potential with a projected ROI of 6-8% annually."
        } else {
            "This property analysis shows balanced characteristics suitable for various buyer types."
        }
    }
}

#[async_trait]
impl TextGenerator for TemplateTextGenerator {
    async fn generate_text(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        Ok(match &self.fixed {
            Some(response) => response.clone(),
            None => Self::template_for(prompt).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let sys = ChatMessage::system("test");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content, "test");

        let user = ChatMessage::user("hello");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "hello");
    }

    #[test]
    fn test_openai_generator_creation() {
        let generator = OpenAiTextGenerator::new("test-key".to_string());
        assert_eq!(generator.model, "gpt-4");

        let generator = generator.with_model("gpt-4o".to_string());
        assert_eq!(generator.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_template_generator_picks_by_keyword() {
        let generator = TemplateTextGenerator::new();
        let price = generator
            .generate_text("Provide a price estimate for 1 Elm St", 100)
            .await
            .unwrap();
        assert!(price.contains("$425,000"));

        let risk = generator
            .generate_text("Evaluate investment risks", 100)
            .await
            .unwrap();
        assert!(risk.contains("Risk assessment"));
    }

    #[tokio::test]
    async fn test_template_generator_fixed_response() {
        let generator = TemplateTextGenerator::with_response("fixed");
        let text = generator.generate_text("anything", 10).await.unwrap();
        assert_eq!(text, "fixed");
    }
}
