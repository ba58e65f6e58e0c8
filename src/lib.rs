//! agent-executive - LLM-driven browser automation
//!
//! Drives web browsers toward user goals. Each task runs its own observe/decide/act
//! loop: capture the page, ask a language model for the next action, execute it through
//! browser automation, repeat until the model finishes.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Chat provider abstraction (Ollama, OpenAI-compatible) and the `LanguageModel` seam
//! - **Browser**: `BrowserDriver` trait with the agent-browser CLI implementation
//! - **Agent**: Action executor, per-task loop and the task supervisor
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use agent_executive::{Config, TaskSupervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = TaskSupervisor::from_config(Config::load().unwrap()).unwrap();
//!     let id = supervisor
//!         .start("Find the page title of example.com", "researcher")
//!         .unwrap();
//!
//!     let snapshot = supervisor.wait(id).await.unwrap();
//!     println!("{:?}: {:?}", snapshot.status, snapshot.summary);
//! }
//! ```

pub mod agent;
pub mod browser;
pub mod cli;
pub mod core;
pub mod llm;

// Re-export commonly used items
pub use self::agent::{TaskEvent, TaskRequest, TaskSnapshot, TaskSupervisor};
pub use self::cli::{format_event, Repl};
pub use self::core::{config, AgentError, Config, LoopPhase, Result, TaskId, TaskStatus};
