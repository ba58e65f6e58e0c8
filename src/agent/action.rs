//! Executable actions and their results
//!
//! The model speaks in free-text [`ActionProposal`]s. Only proposals whose kind maps
//! onto [`Action`] are ever executed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ActionProposal, ExecutionError, Observation, ScrollDirection, ValidationError};

/// Scroll distance when the model does not give one
pub const DEFAULT_SCROLL_PX: u32 = 500;

/// Wait duration when the model does not give one
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Canonical kind names, in the order they are offered to the model
pub const ACTION_KINDS: &[&str] = &[
    "navigate", "click", "type", "scroll", "wait", "ask_user", "finish",
];

/// A validated, executable action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Navigate { url: String },
    Click { target: String },
    Type { target: String, text: String, submit: bool },
    Scroll { direction: ScrollDirection, amount: u32 },
    Wait { duration: Duration },
    AskUser { question: String },
    Finish { summary: String },
}

impl Action {
    /// Map a proposal onto the closed action set
    pub fn from_proposal(proposal: &ActionProposal) -> Result<Self, ValidationError> {
        let kind = normalize_kind(&proposal.kind);
        let target = non_empty(proposal.target.as_deref());
        let value = proposal.value.as_deref();

        let missing = |field: &'static str| ValidationError::MissingField {
            kind: kind.clone(),
            field,
        };

        match kind.as_str() {
            "navigate" | "goto" | "open" => Ok(Action::Navigate {
                url: target.ok_or_else(|| missing("target"))?.to_string(),
            }),
            "click" => Ok(Action::Click {
                target: target.ok_or_else(|| missing("target"))?.to_string(),
            }),
            "type" | "input" | "fill" => Ok(Action::Type {
                target: target.ok_or_else(|| missing("target"))?.to_string(),
                text: value.ok_or_else(|| missing("value"))?.to_string(),
                submit: proposal.submit.unwrap_or(false),
            }),
            "scroll" => {
                let direction = match target {
                    Some(t) => t.parse().map_err(|detail| ValidationError::InvalidField {
                        kind: kind.clone(),
                        field: "target",
                        detail,
                    })?,
                    None => ScrollDirection::Down,
                };
                let amount = match non_empty(value) {
                    Some(v) => v.parse().map_err(|_| ValidationError::InvalidField {
                        kind: kind.clone(),
                        field: "value",
                        detail: format!("'{}' is not a pixel amount", v),
                    })?,
                    None => DEFAULT_SCROLL_PX,
                };
                Ok(Action::Scroll { direction, amount })
            }
            "wait" => {
                let duration = match non_empty(value) {
                    Some(v) => {
                        let secs: f64 = v.parse().map_err(|_| ValidationError::InvalidField {
                            kind: kind.clone(),
                            field: "value",
                            detail: format!("'{}' is not a number of seconds", v),
                        })?;
                        Duration::try_from_secs_f64(secs).map_err(|e| {
                            ValidationError::InvalidField {
                                kind: kind.clone(),
                                field: "value",
                                detail: e.to_string(),
                            }
                        })?
                    }
                    None => DEFAULT_WAIT,
                };
                Ok(Action::Wait { duration })
            }
            "ask_user" | "ask" => {
                let question = non_empty(value)
                    .or(target)
                    .ok_or_else(|| missing("value"))?;
                Ok(Action::AskUser {
                    question: question.to_string(),
                })
            }
            "finish" | "done" | "complete" => {
                let summary = non_empty(value)
                    .or(target)
                    .unwrap_or(proposal.rationale.as_str());
                Ok(Action::Finish {
                    summary: summary.to_string(),
                })
            }
            _ => Err(ValidationError::InvalidActionKind(proposal.kind.clone())),
        }
    }

    /// Canonical kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Scroll { .. } => "scroll",
            Action::Wait { .. } => "wait",
            Action::AskUser { .. } => "ask_user",
            Action::Finish { .. } => "finish",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Navigate { url } => write!(f, "navigate {}", url),
            Action::Click { target } => write!(f, "click {}", target),
            Action::Type {
                target,
                text,
                submit,
            } => {
                write!(f, "type \"{}\" into {}", text, target)?;
                if *submit {
                    write!(f, " and submit")?;
                }
                Ok(())
            }
            Action::Scroll { direction, amount } => write!(f, "scroll {} {}px", direction, amount),
            Action::Wait { duration } => write!(f, "wait {:.1}s", duration.as_secs_f64()),
            Action::AskUser { question } => write!(f, "ask user: {}", question),
            Action::Finish { summary } => write!(f, "finish: {}", summary),
        }
    }
}

fn normalize_kind(kind: &str) -> String {
    kind.trim().to_lowercase().replace(['-', ' '], "_")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Outcome of executing one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the action was performed
    pub success: bool,
    /// Page state captured right after a successful action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    /// Human-readable outcome
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(message: impl Into<String>, observation: Option<Observation>) -> Self {
        Self {
            success: true,
            observation,
            message: message.into(),
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: ExecutionError) -> Self {
        Self {
            success: false,
            observation: None,
            message: error.to_string(),
            error: Some(error),
        }
    }
}
