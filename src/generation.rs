//! Answer generator backends.
//!
//! An [`AnswerGenerator`] turns `(system instructions, user message)` into
//! text. Failures are typed [`PipelineError::Dependency`] errors and an
//! empty completion counts as a failure, never as an answer.
//!
//! | `generation.provider` | Backend |
//! |-----------------------|---------|
//! | `"disabled"` | [`DisabledGenerator`] |
//! | `"openai"` | [`OpenAIGenerator`] (`/v1/chat/completions`, any compatible base URL) |
//! | `"ollama"` | [`OllamaGenerator`] (`/api/chat`) |
//!
//! HTTP backends share the embedding providers' retry policy.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::embedding::post_with_retry;
use crate::error::{PipelineError, Result};

const COMPONENT: &str = "answer generator";

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, system_instructions: &str, user_message: &str) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        Err(PipelineError::dependency(
            COMPONENT,
            "generation is disabled; set [generation].provider",
        ))
    }
}

fn non_empty(text: Option<&str>) -> Result<String> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(PipelineError::dependency(COMPONENT, "model returned an empty answer")),
    }
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system_instructions: &str, user_message: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system_instructions},
                {"role": "user", "content": user_message},
            ],
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        let endpoint = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let json = post_with_retry(self.max_retries, "OpenAI", || {
            self.client
                .post(&endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await
        .map_err(|e| PipelineError::dependency(COMPONENT, format!("{:#}", e)))?;

        non_empty(
            json.pointer("/choices/0/message/content")
                .and_then(|c| c.as_str()),
        )
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system_instructions: &str, user_message: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": [
                {"role": "system", "content": system_instructions},
                {"role": "user", "content": user_message},
            ],
        });
        let endpoint = format!("{}/api/chat", self.url.trim_end_matches('/'));

        let json = post_with_retry(self.max_retries, "Ollama", || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .map_err(|e| PipelineError::dependency(COMPONENT, format!("{:#}", e)))?;

        non_empty(json.pointer("/message/content").and_then(|c| c.as_str()))
    }
}

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_fails_typed() {
        let err = DisabledGenerator.generate("s", "u").await.unwrap_err();
        assert_eq!(err.code(), "dependency_error");
    }

    #[test]
    fn test_empty_completion_is_an_error() {
        assert!(non_empty(Some("   ")).is_err());
        assert!(non_empty(None).is_err());
        assert_eq!(non_empty(Some(" ok ")).unwrap(), "ok");
    }

    #[test]
    fn test_ollama_defaults_to_localhost() {
        let config = GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.url, "http://localhost:11434");
        assert_eq!(generator.model_name(), "gpt-3.5-turbo");
    }
}
