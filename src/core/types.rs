//! Shared types used across agent-executive modules
//!
//! Contains chat messages, task identity and lifecycle enums, page observations
//! and the raw action proposal produced by the language model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a chat exchange with a model provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Identifier of a task (one per tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(TaskId)
    }
}

/// Phase of the per-task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Pending,
    Observing,
    Deciding,
    Acting,
    Completed,
    Failed,
    Cancelled,
}

impl LoopPhase {
    /// Whether the phase ends the task
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopPhase::Completed | LoopPhase::Failed | LoopPhase::Cancelled
        )
    }

    /// Allowed edges of the state machine
    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        match (self, next) {
            (Pending, Observing | Failed | Cancelled) => true,
            (Observing, Deciding | Failed | Cancelled) => true,
            (Deciding, Acting | Failed | Cancelled) => true,
            (Acting, Observing | Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Pending => "pending",
            LoopPhase::Observing => "observing",
            LoopPhase::Deciding => "deciding",
            LoopPhase::Acting => "acting",
            LoopPhase::Completed => "completed",
            LoopPhase::Failed => "failed",
            LoopPhase::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Externally visible status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    WaitingOnModel,
    WaitingOnBrowser,
    WaitingOnUser,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl From<LoopPhase> for TaskStatus {
    fn from(phase: LoopPhase) -> Self {
        match phase {
            LoopPhase::Pending => TaskStatus::Pending,
            LoopPhase::Observing | LoopPhase::Deciding | LoopPhase::Acting => TaskStatus::Running,
            LoopPhase::Completed => TaskStatus::Completed,
            LoopPhase::Failed => TaskStatus::Failed,
            LoopPhase::Cancelled => TaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::WaitingOnModel => "waiting on model",
            TaskStatus::WaitingOnBrowser => "waiting on browser",
            TaskStatus::WaitingOnUser => "waiting on user",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// An actionable element seen on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    /// Driver reference, e.g. `e5`
    pub id: String,
    /// ARIA role
    pub role: String,
    /// Accessible name
    pub name: String,
    /// Current value (for inputs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ElementRef {
    pub fn new(id: impl Into<String>, role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            name: name.into(),
            value: None,
        }
    }

    /// Check if this is an input element
    pub fn is_input(&self) -> bool {
        matches!(
            self.role.as_str(),
            "textbox" | "searchbox" | "combobox" | "spinbutton"
        )
    }

    /// Check if this is clickable
    pub fn is_clickable(&self) -> bool {
        matches!(
            self.role.as_str(),
            "button"
                | "link"
                | "menuitem"
                | "tab"
                | "checkbox"
                | "radio"
                | "switch"
                | "option"
                | "combobox"
                | "textbox"
                | "searchbox"
        )
    }
}

/// Snapshot of the browser state at one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    pub title: String,
    /// Textual page summary (accessibility tree or page text)
    pub summary: String,
    /// Elements the model may target
    #[serde(default)]
    pub elements: Vec<ElementRef>,
    /// Screenshot reference (file path) if one was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            summary: summary.into(),
            elements: Vec::new(),
            screenshot: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<ElementRef>) -> Self {
        self.elements = elements;
        self
    }

    /// Look up an element by driver ref, accepting an optional `@` prefix
    pub fn element(&self, reference: &str) -> Option<&ElementRef> {
        let clean = reference.trim().trim_start_matches('@');
        self.elements.iter().find(|el| el.id == clean)
    }

    /// Format the element list for a prompt
    pub fn format_elements(&self) -> String {
        let mut output = String::new();
        for element in &self.elements {
            let value = element
                .value
                .as_ref()
                .map(|v| format!(" = \"{}\"", v))
                .unwrap_or_default();
            output.push_str(&format!(
                "  [{}] {} \"{}\"{}\n",
                element.id, element.role, element.name, value
            ));
        }
        output
    }
}

/// Raw next-step proposal returned by the language model
///
/// `kind` is free text; it only becomes an executable action after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub kind: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Free-text parameter: text to type, scroll amount, wait seconds, summary
    #[serde(default)]
    pub value: Option<String>,
    /// Submit after typing
    #[serde(default)]
    pub submit: Option<bool>,
    #[serde(default)]
    pub rationale: String,
    /// Model's own estimate of how far along the goal is, 0-100
    #[serde(default)]
    pub progress: Option<u8>,
}

impl ActionProposal {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            value: None,
            submit: None,
            rationale: String::new(),
            progress: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent.min(100));
        self
    }

    /// One-line description for logs and history
    pub fn describe(&self) -> String {
        let mut out = self.kind.clone();
        if let Some(ref target) = self.target {
            out.push_str(&format!(" {}", target));
        }
        if let Some(ref value) = self.value {
            out.push_str(&format!(" \"{}\"", value));
        }
        out
    }
}

/// Scroll direction for the scroll action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("unknown scroll direction '{}'", other)),
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
