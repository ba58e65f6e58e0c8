//! Error types for agent-executive
//!
//! `AgentError` covers infrastructure failures (config, IO, HTTP, provider APIs).
//! The remaining enums describe the failure taxonomy of the observe/decide/act loop
//! and are what ends up recorded in a task snapshot.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::TaskId;

/// Main error type for infrastructure operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Model provider returned a non-success HTTP status
    #[error("{provider} API error ({status}): {message}")]
    ProviderApi {
        provider: String,
        status: u16,
        message: String,
    },

    /// Model provider could not be reached
    #[error("{0}")]
    ProviderUnreachable(String),

    /// Model not available on the provider
    #[error("Model '{0}' not available. For Ollama run: ollama pull {0}")]
    ModelNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Browser driver errors surfaced outside a task loop
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Supervisor errors surfaced to the caller
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a provider API error
    pub fn provider_api(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderApi {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Failure categories reported by a [`BrowserDriver`](crate::browser::BrowserDriver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// Browser session is gone (crashed process, closed session)
    Unreachable,
    /// The referenced element does not exist on the page
    ElementNotFound,
    /// Navigation or a driver command ran past its deadline
    NavigationTimeout,
    /// The driver rejected or failed the command
    CommandFailed,
    /// The automation backend is not installed
    NotInstalled,
}

/// Error from a browser driver call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("browser {kind:?}: {detail}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub detail: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Unreachable, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NavigationTimeout, detail)
    }

    pub fn command(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::CommandFailed, detail)
    }
}

/// Failure categories reported by a [`LanguageModel`](crate::llm::LanguageModel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    RateLimited,
    /// Reply could not be parsed into a proposal
    InvalidResponse,
    Timeout,
    Unauthorized,
    /// Provider down, unreachable or returned a server error
    Unavailable,
}

impl ModelErrorKind {
    /// Whether retrying the same request can help
    pub fn is_retryable(self) -> bool {
        !matches!(self, ModelErrorKind::Unauthorized)
    }
}

/// Error from a language model call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("model {kind:?}: {detail}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub detail: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn invalid_response(detail: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidResponse, detail)
    }
}

impl From<AgentError> for ModelError {
    fn from(err: AgentError) -> Self {
        let kind = match &err {
            AgentError::ProviderApi { status, .. } => match status {
                429 => ModelErrorKind::RateLimited,
                401 | 403 => ModelErrorKind::Unauthorized,
                408 | 504 => ModelErrorKind::Timeout,
                _ => ModelErrorKind::Unavailable,
            },
            AgentError::Http(e) if e.is_timeout() => ModelErrorKind::Timeout,
            AgentError::Http(e) if e.is_decode() => ModelErrorKind::InvalidResponse,
            AgentError::Json(_) => ModelErrorKind::InvalidResponse,
            _ => ModelErrorKind::Unavailable,
        };
        Self::new(kind, err.to_string())
    }
}

/// Why a proposal could not be turned into an executable action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Kind is outside the closed action set
    #[error("unknown action kind '{0}'")]
    InvalidActionKind(String),

    #[error("action '{kind}' requires a {field}")]
    MissingField { kind: String, field: &'static str },

    #[error("action '{kind}' has an invalid {field}: {detail}")]
    InvalidField {
        kind: String,
        field: &'static str,
        detail: String,
    },
}

/// Why an action did not execute
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("action timed out after {}ms", .elapsed.as_millis())]
    Timeout { elapsed: Duration },

    #[error("{error}")]
    Driver { error: DriverError },

    /// Control actions (finish, ask_user) are handled by the task loop
    #[error("action '{kind}' is not executable by the browser")]
    NotExecutable { kind: String },
}

/// Coarse classification of a terminal task error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    Driver,
    Model,
    TargetNotFound,
    Timeout,
    InvalidActionKind,
    MaxIterationsExceeded,
    Session,
    Panicked,
}

/// Terminal error recorded on a failed task
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskError {
    #[error("{error}")]
    Driver { error: DriverError },

    #[error("{error}")]
    Model { error: ModelError },

    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("step timed out after {}ms", .elapsed.as_millis())]
    Timeout { elapsed: Duration },

    #[error("model kept proposing unknown action kind '{kind}'")]
    InvalidActionKind { kind: String },

    #[error("max iterations exceeded ({limit}) without a finish action")]
    MaxIterationsExceeded { limit: usize },

    #[error("could not open browser session: {error}")]
    Session { error: DriverError },

    #[error("task loop panicked: {message}")]
    Panicked { message: String },
}

impl TaskError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::Driver { .. } => TaskErrorKind::Driver,
            TaskError::Model { .. } => TaskErrorKind::Model,
            TaskError::TargetNotFound { .. } => TaskErrorKind::TargetNotFound,
            TaskError::Timeout { .. } => TaskErrorKind::Timeout,
            TaskError::InvalidActionKind { .. } => TaskErrorKind::InvalidActionKind,
            TaskError::MaxIterationsExceeded { .. } => TaskErrorKind::MaxIterationsExceeded,
            TaskError::Session { .. } => TaskErrorKind::Session,
            TaskError::Panicked { .. } => TaskErrorKind::Panicked,
        }
    }
}

impl From<DriverError> for TaskError {
    fn from(error: DriverError) -> Self {
        TaskError::Driver { error }
    }
}

impl From<ModelError> for TaskError {
    fn from(error: ModelError) -> Self {
        TaskError::Model { error }
    }
}

impl From<ExecutionError> for TaskError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::TargetNotFound { target } => TaskError::TargetNotFound { target },
            ExecutionError::Timeout { elapsed } => TaskError::Timeout { elapsed },
            ExecutionError::Driver { error } => TaskError::Driver { error },
            ExecutionError::NotExecutable { kind } => TaskError::InvalidActionKind { kind },
        }
    }
}

/// Errors returned by the caller-facing supervisor API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("capacity exceeded: {limit} tasks already running")]
    CapacityExceeded { limit: usize },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {0} is not waiting on a user reply")]
    NotWaitingOnUser(TaskId),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}
