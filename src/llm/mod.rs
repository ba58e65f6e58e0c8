//! LLM module - language model integrations
//!
//! `LLMProvider` abstracts the chat backend (Ollama or any OpenAI-compatible API).
//! `LanguageModel` is the narrower seam the task loop depends on.

pub mod model;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod traits;

pub use model::{parse_proposal, ChatModel, LanguageModel};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use prompt::Prompt;
pub use provider::create_provider;
pub use traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};
