//! Browser automation seam
//!
//! The task loop only ever talks to a [`BrowserDriver`]. Each task gets its own driver
//! from a [`DriverFactory`], so sessions are never shared.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{DriverError, Observation, ScrollDirection, TaskId};

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// One browser session
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Capture the current page state
    async fn observe(&self) -> DriverResult<Observation>;

    /// Click an element by driver ref
    async fn click(&self, target: &str) -> DriverResult<()>;

    /// Fill an input by driver ref, optionally pressing Enter afterwards
    async fn type_text(&self, target: &str, text: &str, submit: bool) -> DriverResult<()>;

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DriverResult<()>;

    /// Save a screenshot and return a reference to it (file path)
    async fn screenshot(&self) -> DriverResult<String>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn close(&self) -> DriverResult<()>;
}

/// Opens a dedicated session per task
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open_session(&self, task_id: TaskId) -> DriverResult<Arc<dyn BrowserDriver>>;
}
