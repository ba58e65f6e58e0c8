//! agent-browser CLI driver
//!
//! Every task gets its own `--session`, so tabs never see each other's cookies or pages.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::browser::driver::{BrowserDriver, DriverFactory, DriverResult};
use crate::browser::snapshot::Snapshot;
use crate::core::config::BrowserConfig;
use crate::core::{DriverError, DriverErrorKind, Observation, ScrollDirection, TaskId};

const BINARY: &str = "agent-browser";

/// [`BrowserDriver`] wrapping one agent-browser session
pub struct AgentBrowserDriver {
    session_name: String,
    headed: bool,
    command_timeout: Duration,
    screenshot_dir: PathBuf,
    capture_screenshots: bool,
    summary_max_chars: usize,
}

impl AgentBrowserDriver {
    pub fn new(session_name: impl Into<String>, config: &BrowserConfig) -> Self {
        Self {
            session_name: session_name.into(),
            headed: config.headed,
            command_timeout: config.command_timeout(),
            screenshot_dir: config.screenshot_dir.clone(),
            capture_screenshots: config.capture_screenshots,
            summary_max_chars: config.summary_max_chars,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Check if agent-browser is installed
    pub async fn is_available() -> bool {
        Command::new(BINARY)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run an agent-browser command in this session
    async fn run_command(&self, args: &[&str]) -> DriverResult<String> {
        let mut cmd = Command::new(BINARY);
        cmd.args(["--session", &self.session_name]);

        if self.headed {
            cmd.arg("--headed");
        }

        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(session = %self.session_name, ?args, "agent-browser");

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DriverError::new(
                        DriverErrorKind::NotInstalled,
                        "agent-browser not found. Install with: npm install -g agent-browser",
                    )
                } else {
                    DriverError::unreachable(format!("Failed to run agent-browser: {}", e))
                }
            })?,
            Err(_) => {
                return Err(DriverError::timeout(format!(
                    "'{}' did not finish within {}ms",
                    args.join(" "),
                    self.command_timeout.as_millis()
                )))
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(stderr.trim()))
        }
    }

    async fn get(&self, what: &str) -> DriverResult<String> {
        self.run_command(&["get", what])
            .await
            .map(|s| s.trim().to_string())
    }
}

/// Map agent-browser stderr onto a driver error kind
fn classify_failure(stderr: &str) -> DriverError {
    let lower = stderr.to_lowercase();
    let kind = if lower.contains("no element")
        || lower.contains("element not found")
        || lower.contains("unknown ref")
    {
        DriverErrorKind::ElementNotFound
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DriverErrorKind::NavigationTimeout
    } else if lower.contains("browser has been closed")
        || lower.contains("target closed")
        || lower.contains("not running")
    {
        DriverErrorKind::Unreachable
    } else {
        DriverErrorKind::CommandFailed
    };
    DriverError::new(kind, format!("agent-browser command failed: {}", stderr))
}

/// agent-browser addresses snapshot refs as `@e5`
fn element_arg(target: &str) -> String {
    format!("@{}", target.trim().trim_start_matches('@'))
}

#[async_trait]
impl BrowserDriver for AgentBrowserDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.run_command(&["open", url]).await?;

        if let Err(e) = self.run_command(&["wait", "--load", "networkidle"]).await {
            debug!(session = %self.session_name, error = %e, "Page did not reach network idle");
        }
        Ok(())
    }

    async fn observe(&self) -> DriverResult<Observation> {
        let output = self.run_command(&["snapshot", "-i", "--json"]).await?;
        let snapshot: Snapshot = serde_json::from_str(&output)
            .map_err(|e| DriverError::command(format!("Unreadable snapshot: {}", e)))?;

        if !snapshot.success {
            return Err(DriverError::command(
                snapshot
                    .error
                    .unwrap_or_else(|| "snapshot failed".to_string()),
            ));
        }

        let url = self.get("url").await?;
        let title = self.get("title").await?;

        let mut observation = Observation::new(url, title, snapshot.summary(self.summary_max_chars))
            .with_elements(snapshot.to_elements());

        if self.capture_screenshots {
            match self.screenshot().await {
                Ok(path) => observation.screenshot = Some(path),
                Err(e) => warn!(session = %self.session_name, error = %e, "Screenshot failed"),
            }
        }

        Ok(observation)
    }

    async fn click(&self, target: &str) -> DriverResult<()> {
        self.run_command(&["click", &element_arg(target)]).await?;
        Ok(())
    }

    async fn type_text(&self, target: &str, text: &str, submit: bool) -> DriverResult<()> {
        self.run_command(&["fill", &element_arg(target), text]).await?;
        if submit {
            self.run_command(&["press", "Enter"]).await?;
        }
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DriverResult<()> {
        let px = amount.to_string();
        self.run_command(&["scroll", direction.as_str(), &px]).await?;
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<String> {
        tokio::fs::create_dir_all(&self.screenshot_dir)
            .await
            .map_err(|e| DriverError::command(format!("Cannot create screenshot dir: {}", e)))?;

        let filename = format!(
            "{}_{}.png",
            self.session_name,
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let path = self.screenshot_dir.join(filename);
        let path_str = path.to_string_lossy().into_owned();

        self.run_command(&["screenshot", &path_str]).await?;
        Ok(path_str)
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.get("url").await
    }

    async fn close(&self) -> DriverResult<()> {
        self.run_command(&["close"]).await?;
        Ok(())
    }
}

/// Opens one agent-browser session per task, named `<prefix>-<task id>`
pub struct AgentBrowserFactory {
    config: BrowserConfig,
}

impl AgentBrowserFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    pub fn session_name(&self, task_id: TaskId) -> String {
        format!("{}-{}", self.config.session_prefix, task_id)
    }
}

#[async_trait]
impl DriverFactory for AgentBrowserFactory {
    async fn open_session(&self, task_id: TaskId) -> DriverResult<Arc<dyn BrowserDriver>> {
        if !AgentBrowserDriver::is_available().await {
            return Err(DriverError::new(
                DriverErrorKind::NotInstalled,
                "agent-browser not found. Install with: npm install -g agent-browser",
            ));
        }
        let session = self.session_name(task_id);
        debug!(task_id = %task_id, session = %session, "Opening browser session");
        Ok(Arc::new(AgentBrowserDriver::new(session, &self.config)))
    }
}
