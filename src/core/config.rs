//! Configuration management for agent-executive
//!
//! Supports a TOML config file, environment variables and runtime overrides.
//! The whole value is handed to `TaskSupervisor::new`; nothing here is global.
//!
//! Config file location: ~/.config/agent-executive/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{AgentError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Browser configuration
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Supervisor limits
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Per-task loop behaviour
    #[serde(default)]
    pub task: TaskConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which model backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi,
}

impl std::str::FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" | "open-ai" | "open_ai" => Ok(ProviderKind::OpenAi),
            other => Err(AgentError::config(format!("unknown provider '{}'", other))),
        }
    }
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model used to propose actions
    pub model: String,
    /// Ollama host address
    pub host: String,
    /// Ollama port number
    pub port: u16,
    /// Base URL for OpenAI-compatible APIs
    pub base_url: String,
    /// API key for OpenAI-compatible APIs (usually from OPENAI_API_KEY)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            model: "qwen3:8b".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: 0.2,
            max_tokens: 500,
        }
    }
}

impl ProviderConfig {
    /// Full Ollama API URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Browser automation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Prefix for per-task agent-browser session names
    pub session_prefix: String,
    /// Whether to run in headed mode (visible browser)
    pub headed: bool,
    /// Timeout for a single agent-browser command in ms
    pub command_timeout_ms: u64,
    /// Where screenshots are written
    pub screenshot_dir: PathBuf,
    /// Capture a screenshot with every observation
    pub capture_screenshots: bool,
    /// Maximum characters of page summary kept per observation
    pub summary_max_chars: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            session_prefix: "agent-exec".to_string(),
            headed: false,
            command_timeout_ms: 30_000,
            screenshot_dir: Config::config_dir().join("screenshots"),
            capture_screenshots: false,
            summary_max_chars: 4000,
        }
    }
}

impl BrowserConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// What `start` does when the concurrency ceiling is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Keep the task Pending until a slot frees up
    Queue,
    /// Refuse with `CapacityExceeded`
    Reject,
}

/// Supervisor limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Maximum number of task loops running at once
    pub max_concurrent_tasks: usize,
    pub overflow: OverflowPolicy,
    /// Broadcast buffer for task events; slow subscribers lag past this
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            overflow: OverflowPolicy::Queue,
            event_capacity: 256,
        }
    }
}

/// Per-task loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Observe/decide/act cycles allowed before failing
    pub max_iterations: usize,
    /// History entries kept for the prompt (oldest dropped first)
    pub history_limit: usize,
    /// Timeout for each observing, deciding or acting step in ms
    pub step_timeout_ms: u64,
    /// Extra observe attempts after a driver failure
    pub observe_retries: u32,
    /// Extra model attempts after a retryable model failure
    pub model_retries: u32,
    /// Re-prompts after an unknown action kind
    pub invalid_action_reprompts: u32,
    /// Failed actions in a row before the task fails
    pub max_consecutive_action_failures: u32,
    /// First retry delay in ms; doubles per attempt
    pub backoff_base_ms: u64,
    /// Upper bound on a single retry delay in ms
    pub backoff_max_ms: u64,
    /// How long an ask_user action waits for a reply, in seconds
    pub ask_user_timeout_secs: u64,
    /// Log entries kept in a task snapshot
    pub log_limit: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            history_limit: 10,
            step_timeout_ms: 30_000,
            observe_retries: 1,
            model_retries: 2,
            invalid_action_reprompts: 1,
            max_consecutive_action_failures: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            ask_user_timeout_secs: 300,
            log_limit: 200,
        }
    }
}

impl TaskConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn ask_user_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_user_timeout_secs)
    }
}

/// Logging output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Raise the default filter to debug
    pub debug: bool,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl LoggingConfig {
    /// Default `EnvFilter` directive when RUST_LOG is unset
    pub fn default_filter(&self) -> &'static str {
        if self.debug {
            "agent_executive=debug"
        } else {
            "agent_executive=info"
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agent-executive")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = if Self::config_exists() {
            Self::load_from_file()?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        let content = fs::read_to_string(&config_path)
            .map_err(|e| AgentError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AgentError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(kind) = env::var("AGENT_EXEC_PROVIDER") {
            self.provider.kind = kind.parse()?;
        }
        if let Ok(model) = env::var("AGENT_EXEC_MODEL") {
            self.provider.model = model;
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(host) = env::var("OLLAMA_HOST") {
            self.provider.host = host;
        }
        if let Some(port) = env::var("OLLAMA_PORT").ok().and_then(|p| p.parse().ok()) {
            self.provider.port = port;
        }
        if let Some(max) = env::var("AGENT_EXEC_MAX_TASKS")
            .ok()
            .and_then(|m| m.parse().ok())
        {
            self.supervisor.max_concurrent_tasks = max;
        }
        if let Ok(headed) = env::var("AGENT_EXEC_HEADED") {
            self.browser.headed = headed == "true" || headed == "1";
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| AgentError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AgentError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| AgentError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Check if a config file exists
    pub fn config_exists() -> bool {
        Self::config_file().exists()
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.port, 11434);
        assert_eq!(config.supervisor.max_concurrent_tasks, 4);
        assert_eq!(config.supervisor.overflow, OverflowPolicy::Queue);
        assert_eq!(config.task.max_iterations, 25);
        assert_eq!(config.task.observe_retries, 1);
    }

    #[test]
    fn test_ollama_url() {
        let config = Config::default();
        assert_eq!(config.provider.ollama_url(), "http://localhost:11434");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [supervisor]
            max_concurrent_tasks = 2
            overflow = "reject"

            [task]
            max_iterations = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.supervisor.max_concurrent_tasks, 2);
        assert_eq!(config.supervisor.overflow, OverflowPolicy::Reject);
        assert_eq!(config.task.max_iterations, 5);
        assert_eq!(config.task.history_limit, 10);
        assert_eq!(config.provider.model, "qwen3:8b");
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default_config_toml();
        assert!(toml_str.contains("max_concurrent_tasks"));
        assert!(toml_str.contains("step_timeout_ms"));
        assert!(!toml_str.contains("api_key"));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!("bard".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("agent-executive"));
    }
}
