//! Task events and snapshot publishing
//!
//! Every phase change goes out on the shared broadcast channel and into the task's
//! watch channel. Nothing here ever blocks on a reader.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::agent::task::{LogLevel, TaskSnapshot};
use crate::core::{LoopPhase, Observation, TaskError, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Task registered, phase is `Pending`
    Created,
    /// Phase changed
    Transition,
    /// The task is waiting for `reply`
    Question,
}

/// Something the display should know about
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    pub phase: LoopPhase,
    pub status: TaskStatus,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub at: DateTime<Utc>,
}

/// Single writer for one task's snapshot and events
pub struct TaskReporter {
    task_id: TaskId,
    snapshot: watch::Sender<TaskSnapshot>,
    events: broadcast::Sender<TaskEvent>,
    log_limit: usize,
    terminal: AtomicBool,
}

impl TaskReporter {
    pub fn new(
        snapshot: watch::Sender<TaskSnapshot>,
        events: broadcast::Sender<TaskEvent>,
        log_limit: usize,
    ) -> Self {
        let task_id = snapshot.borrow().id;
        Self {
            task_id,
            snapshot,
            events,
            log_limit,
            terminal: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn phase(&self) -> LoopPhase {
        self.snapshot.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot.subscribe()
    }

    /// Announce a freshly registered task
    pub fn created(&self) {
        let snap = self.snapshot();
        self.publish(
            TaskEventKind::Created,
            format!("queued: {}", snap.goal),
            None,
        );
    }

    /// Move to `phase`, publishing an event and a log line
    ///
    /// Returns `false` and changes nothing if the edge is not allowed, e.g. a second
    /// terminal transition.
    pub fn transition(&self, phase: LoopPhase, summary: impl Into<String>) -> bool {
        let summary = summary.into();
        let mut from = phase;
        let changed = self.snapshot.send_if_modified(|snap| {
            from = snap.phase;
            if !snap.phase.can_transition_to(phase) {
                return false;
            }
            snap.phase = phase;
            snap.status = phase.into();
            snap.updated_at = Utc::now();
            let level = if phase == LoopPhase::Failed {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            snap.push_log(level, format!("{} -> {}: {}", from, phase, summary), self.log_limit);
            true
        });

        if !changed {
            warn!(task_id = %self.task_id, %from, to = %phase, "Ignoring transition");
            return false;
        }

        match phase {
            LoopPhase::Failed => error!(task_id = %self.task_id, %from, "failed: {}", summary),
            _ => info!(task_id = %self.task_id, %from, to = %phase, "{}", summary),
        }
        if phase.is_terminal() {
            self.terminal.store(true, Ordering::SeqCst);
        }

        let screenshot = self
            .snapshot
            .borrow()
            .latest_observation
            .as_ref()
            .and_then(|o| o.screenshot.clone());
        self.publish(TaskEventKind::Transition, summary, screenshot);
        true
    }

    /// Record the terminal outcome and transition
    pub fn finish(
        &self,
        phase: LoopPhase,
        summary: Option<String>,
        error: Option<TaskError>,
    ) -> bool {
        if self.terminal.load(Ordering::SeqCst) {
            return false;
        }
        let text = match (&summary, &error) {
            (_, Some(err)) => err.to_string(),
            (Some(s), None) => s.clone(),
            (None, None) => phase.to_string(),
        };
        self.snapshot.send_modify(|snap| {
            snap.summary = summary;
            snap.error = error;
            snap.pending_question = None;
        });
        self.transition(phase, text)
    }

    /// Status changes inside a phase (waiting on browser, model or user)
    pub fn set_status(&self, status: TaskStatus) {
        self.snapshot.send_if_modified(|snap| {
            if snap.phase.is_terminal() || snap.status == status {
                return false;
            }
            snap.status = status;
            snap.updated_at = Utc::now();
            true
        });
    }

    pub fn observed(&self, observation: &Observation) {
        self.snapshot.send_modify(|snap| {
            snap.latest_observation = Some(observation.clone());
            snap.updated_at = Utc::now();
        });
    }

    /// Counters after a recorded step; a missing estimate keeps the previous one
    pub fn progress(&self, iteration: usize, history_len: usize, estimate: Option<u8>) {
        self.snapshot.send_modify(|snap| {
            snap.iteration = iteration;
            snap.history_len = history_len;
            if estimate.is_some() {
                snap.progress = estimate;
            }
        });
    }

    /// Publish a question and wait on the user
    pub fn ask(&self, question: &str) {
        self.snapshot.send_modify(|snap| {
            snap.pending_question = Some(question.to_string());
            snap.status = TaskStatus::WaitingOnUser;
            snap.updated_at = Utc::now();
            snap.push_log(LogLevel::Info, format!("asks: {}", question), self.log_limit);
        });
        info!(task_id = %self.task_id, "Waiting on user: {}", question);
        self.publish(TaskEventKind::Question, question.to_string(), None);
    }

    pub fn answered(&self) {
        self.snapshot.send_modify(|snap| {
            snap.pending_question = None;
            if !snap.phase.is_terminal() {
                snap.status = TaskStatus::Running;
            }
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(task_id = %self.task_id, "{}", message),
            LogLevel::Warn => warn!(task_id = %self.task_id, "{}", message),
            LogLevel::Error => error!(task_id = %self.task_id, "{}", message),
        }
        self.snapshot.send_modify(|snap| {
            snap.push_log(level, message, self.log_limit);
        });
    }

    fn publish(&self, kind: TaskEventKind, summary: String, screenshot: Option<String>) {
        let (phase, status) = {
            let snap = self.snapshot.borrow();
            (snap.phase, snap.status)
        };
        // no subscribers is fine
        let _ = self.events.send(TaskEvent {
            task_id: self.task_id,
            kind,
            phase,
            status,
            summary,
            screenshot,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task::TaskRequest;

    fn reporter() -> (TaskReporter, broadcast::Receiver<TaskEvent>) {
        let request = TaskRequest::new("g", "r");
        let (snap_tx, _) = watch::channel(TaskSnapshot::new(TaskId(1), &request));
        let (events, rx) = broadcast::channel(16);
        (TaskReporter::new(snap_tx, events, 10), rx)
    }

    #[test]
    fn test_transition_publishes_event() {
        let (reporter, mut rx) = reporter();
        assert!(reporter.transition(LoopPhase::Observing, "looking"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, TaskEventKind::Transition);
        assert_eq!(event.phase, LoopPhase::Observing);
        assert_eq!(event.status, TaskStatus::Running);
        assert_eq!(reporter.snapshot().log.len(), 1);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let (reporter, mut rx) = reporter();
        assert!(!reporter.transition(LoopPhase::Completed, "too early"));
        assert_eq!(reporter.phase(), LoopPhase::Pending);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_finish_only_once() {
        let (reporter, _rx) = reporter();
        assert!(reporter.finish(LoopPhase::Cancelled, None, None));
        assert!(!reporter.finish(
            LoopPhase::Failed,
            None,
            Some(TaskError::Panicked {
                message: "late".into()
            })
        ));
        let snap = reporter.snapshot();
        assert_eq!(snap.status, TaskStatus::Cancelled);
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_status_frozen_after_terminal() {
        let (reporter, _rx) = reporter();
        reporter.finish(LoopPhase::Cancelled, None, None);
        reporter.set_status(TaskStatus::WaitingOnBrowser);
        assert_eq!(reporter.snapshot().status, TaskStatus::Cancelled);
    }
}
