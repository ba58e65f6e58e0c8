//! Ollama client implementation
//!
//! Async HTTP client for the Ollama chat API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::config::ProviderConfig;
use crate::core::{AgentError, Message, Result};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

/// Ollama chat request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

/// Ollama chat response (non-streaming)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Message,
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Model information
#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client from provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_url(),
        })
    }

    fn connect_error(&self, e: reqwest::Error) -> AgentError {
        if e.is_connect() {
            AgentError::ProviderUnreachable(format!(
                "Cannot connect to Ollama at {}. Is it running?",
                self.base_url
            ))
        } else {
            AgentError::from(e)
        }
    }

    fn to_llm_response(response: ChatResponse) -> LLMResponse {
        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage::new(prompt, completion)),
            _ => None,
        };

        LLMResponse {
            content: response.message.content,
            usage,
            model: response.model,
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let json = options.as_ref().map(|o| o.json).unwrap_or(false);
        let ollama_options = options.map(|opts| OllamaOptions {
            temperature: opts.temperature,
            num_predict: opts.max_tokens,
            stop: opts.stop,
        });

        let request = ChatRequest {
            model,
            messages,
            format: json.then_some("json"),
            options: ollama_options,
            stream: false,
        };

        debug!(model, messages = messages.len(), "Sending Ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 && error_text.contains("not found") {
                return Err(AgentError::ModelNotFound(model.to_string()));
            }

            return Err(AgentError::provider_api("ollama", status.as_u16(), error_text));
        }

        let response_text = response.text().await?;
        debug!(bytes = response_text.len(), "Ollama response received");

        let chat_response: ChatResponse = serde_json::from_str(&response_text)?;
        Ok(Self::to_llm_response(chat_response))
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m == model || m.split(':').next() == model.split(':').next()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(AgentError::provider_api("ollama", status, "Failed to list models"));
        }

        let models_response: ModelsResponse = response.json().await?;
        Ok(models_response.models.into_iter().map(|m| m.name).collect())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::from_config(&ProviderConfig::default()).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_request_uses_json_format() {
        let messages = vec![Message::user("Hello")];
        let request = ChatRequest {
            model: "qwen3:8b",
            messages: &messages,
            format: Some("json"),
            options: None,
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("options").is_none());
    }

    #[test]
    fn test_response_conversion() {
        let raw = r#"{"model":"qwen3:8b","message":{"role":"assistant","content":"{}"},"prompt_eval_count":10,"eval_count":5}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = OllamaClient::to_llm_response(parsed);
        assert_eq!(response.content, "{}");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }
}
