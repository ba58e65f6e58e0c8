//! Core module - shared infrastructure for agent-executive
//!
//! This module contains foundational types, configuration, and error handling
//! used throughout the application.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{
    AgentError, DriverError, DriverErrorKind, ExecutionError, ModelError, ModelErrorKind, Result,
    SupervisorError, TaskError, TaskErrorKind, ValidationError,
};
pub use types::*;
