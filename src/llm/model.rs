//! Language model seam used by the task loop
//!
//! [`ChatModel`] renders a [`Prompt`] into chat messages, sends them through any
//! [`LLMProvider`] and parses the reply into an [`ActionProposal`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::config::ProviderConfig;
use crate::core::{ActionProposal, ModelError, Result};
use crate::llm::prompt::Prompt;
use crate::llm::provider::create_provider;
use crate::llm::traits::{GenerateOptions, LLMProvider};

/// Produces the next action proposal for a task
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn propose(
        &self,
        prompt: &Prompt<'_>,
    ) -> std::result::Result<ActionProposal, ModelError>;
}

/// [`LanguageModel`] backed by a chat provider
#[derive(Clone)]
pub struct ChatModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: GenerateOptions,
}

impl ChatModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            options: GenerateOptions {
                json: true,
                ..GenerateOptions::default()
            },
        }
    }

    /// Build the provider named in config and wrap it
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::new(provider, config.model.clone()).with_options(GenerateOptions {
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            stop: None,
            json: true,
        }))
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    /// Whether the provider serves the configured model
    pub async fn is_available(&self) -> Result<bool> {
        self.provider.is_model_available(&self.model).await
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    async fn propose(
        &self,
        prompt: &Prompt<'_>,
    ) -> std::result::Result<ActionProposal, ModelError> {
        let messages = prompt.to_messages();
        let response = self
            .provider
            .chat(&self.model, &messages, Some(self.options.clone()))
            .await?;

        debug!(
            model = %response.model,
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "Model replied"
        );

        parse_proposal(&response.content)
    }
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default, alias = "type")]
    action: Option<String>,
    #[serde(default)]
    target: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    submit: Option<bool>,
    #[serde(default, alias = "rationale")]
    reasoning: Option<String>,
    #[serde(default)]
    progress: Option<Value>,
}

/// Parse a model reply against the response schema
///
/// Tolerates markdown fences, a leading `<think>` block and prose around the object.
pub fn parse_proposal(content: &str) -> std::result::Result<ActionProposal, ModelError> {
    let json = extract_json_object(content).ok_or_else(|| {
        ModelError::invalid_response(format!("no JSON object in reply: {}", preview(content)))
    })?;

    let raw: RawReply = serde_json::from_str(json).map_err(|e| {
        ModelError::invalid_response(format!("malformed JSON ({}): {}", e, preview(json)))
    })?;

    let kind = raw
        .action
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ModelError::invalid_response("reply is missing required field 'action'"))?;

    let rationale = raw
        .reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            ModelError::invalid_response("reply is missing required field 'reasoning'")
        })?;

    Ok(ActionProposal {
        kind,
        target: raw.target.and_then(scalar_to_string),
        value: raw.value.and_then(scalar_to_string),
        submit: raw.submit,
        rationale,
        progress: raw.progress.and_then(percent),
    })
}

fn extract_json_object(content: &str) -> Option<&str> {
    let body = match content.find("</think>") {
        Some(end) => &content[end + "</think>".len()..],
        None => content,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Progress arrives as `40`, `"40"` or `"40%"`; anything else is ignored
fn percent(value: Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    number
        .is_finite()
        .then(|| number.round().clamp(0.0, 100.0) as u8)
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}
