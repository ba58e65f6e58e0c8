//! Browser automation module
//!
//! The [`BrowserDriver`] trait plus the agent-browser CLI implementation.

mod agent_browser;
mod driver;
mod snapshot;
pub mod url;

pub use agent_browser::{AgentBrowserDriver, AgentBrowserFactory};
pub use driver::{BrowserDriver, DriverFactory, DriverResult};
pub use snapshot::{truncate_chars, Element, Snapshot};
pub use url::{clean_url, UrlError};
