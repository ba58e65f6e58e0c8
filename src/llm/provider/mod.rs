//! Provider factory
//!
//! Picks the chat backend named in [`ProviderConfig`].

use std::sync::Arc;

use tracing::debug;

use crate::core::config::{ProviderConfig, ProviderKind};
use crate::core::Result;
use crate::llm::ollama::OllamaClient;
use crate::llm::openai::OpenAiClient;
use crate::llm::traits::LLMProvider;

/// Create a new LLM provider based on configuration
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaClient::from_config(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::from_config(config)?),
    };
    debug!(provider = provider.name(), model = %config.model, "Provider created");
    Ok(provider)
}
