//! Agent module - the decision/action loop and its supervisor
//!
//! `TaskSupervisor` owns one `TaskLoop` per task. Each loop cycles observe, decide and
//! act against its own browser session until the model finishes or the task fails.

pub mod action;
pub mod events;
pub mod executor;
pub mod history;
pub mod supervisor;
pub mod task;
pub mod task_loop;

pub use action::{Action, ExecutionResult, ACTION_KINDS};
pub use events::{TaskEvent, TaskEventKind, TaskReporter};
pub use executor::ActionExecutor;
pub use history::{History, HistoryEntry};
pub use supervisor::TaskSupervisor;
pub use task::{LogEntry, LogLevel, ReplySlot, TaskRequest, TaskSnapshot};
pub use task_loop::{backoff_delay, close_session, TaskLoop};
