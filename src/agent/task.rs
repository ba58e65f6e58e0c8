//! Task records
//!
//! A [`TaskSnapshot`] is the externally visible state of one task. The loop owns the
//! only writer; readers get clones through a watch channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::core::{LoopPhase, Observation, TaskError, TaskId, TaskStatus};

/// What the caller asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub goal: String,
    pub role: String,
    /// Page to open before the first observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
}

impl TaskRequest {
    pub fn new(goal: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            role: role.into(),
            start_url: None,
        }
    }

    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.start_url = (!url.trim().is_empty()).then_some(url);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One line of the per-task log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:5} {}",
            self.at.format("%H:%M:%S"),
            self.level.to_string(),
            self.message
        )
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub goal: String,
    pub role: String,
    pub start_url: Option<String>,
    pub status: TaskStatus,
    pub phase: LoopPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Completed observe/decide/act cycles
    pub iteration: usize,
    pub latest_observation: Option<Observation>,
    pub log: VecDeque<LogEntry>,
    /// Set when the task completes
    pub summary: Option<String>,
    /// Set when the task fails
    pub error: Option<TaskError>,
    pub history_len: usize,
    /// Latest completion estimate reported by the model, 0-100
    pub progress: Option<u8>,
    /// Open question while waiting on the user
    pub pending_question: Option<String>,
}

impl TaskSnapshot {
    pub fn new(id: TaskId, request: &TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            goal: request.goal.clone(),
            role: request.role.clone(),
            start_url: request.start_url.clone(),
            status: TaskStatus::Pending,
            phase: LoopPhase::Pending,
            created_at: now,
            updated_at: now,
            iteration: 0,
            latest_observation: None,
            log: VecDeque::new(),
            summary: None,
            error: None,
            history_len: 0,
            progress: None,
            pending_question: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Append a log line, dropping the oldest past `limit`
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>, limit: usize) {
        self.log.push_back(LogEntry {
            at: Utc::now(),
            level,
            message: message.into(),
        });
        while self.log.len() > limit {
            self.log.pop_front();
        }
    }

    /// One-line listing used by the REPL
    pub fn one_line(&self) -> String {
        let detail = match (&self.summary, &self.error, &self.pending_question) {
            (Some(summary), _, _) => summary.clone(),
            (_, Some(error), _) => error.to_string(),
            (_, _, Some(question)) => format!("asks: {}", question),
            _ => self
                .latest_observation
                .as_ref()
                .map(|o| o.url.clone())
                .unwrap_or_default(),
        };
        format!(
            "#{:<3} {:<18} iter {:<3} {} | {}",
            self.id.to_string(),
            self.status.to_string(),
            self.iteration,
            self.goal,
            detail
        )
    }
}

/// Where a user's answer to the task's open question is delivered
///
/// Each question opens the slot for exactly one answer. Replies sent while no question
/// is open, or after the first answer, are refused.
#[derive(Clone, Default)]
pub struct ReplySlot {
    pending: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the slot for a new question, discarding any stale one
    pub fn open(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some(tx);
        rx
    }

    /// Deliver an answer; `false` when no question is waiting for one
    pub fn answer(&self, text: impl Into<String>) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<String>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
