//! Interactive REPL for agent-executive
//!
//! Reads commands from stdin while a background task prints the event stream.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

use crate::agent::{TaskEvent, TaskEventKind, TaskSupervisor};
use crate::browser::{AgentBrowserDriver, AgentBrowserFactory};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Result, TaskStatus};
use crate::llm::ChatModel;

/// How long to let the event printer flush after shutdown
pub const PRINTER_DRAIN: Duration = Duration::from_millis(500);

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    supervisor: TaskSupervisor,
    chat: Arc<ChatModel>,
}

impl Repl {
    pub fn new(supervisor: TaskSupervisor, chat: Arc<ChatModel>) -> Self {
        Self { supervisor, chat }
    }

    /// Create a REPL backed by the configured provider and agent-browser
    pub fn with_config(config: Config) -> Result<Self> {
        let chat = Arc::new(ChatModel::from_config(&config.provider)?);
        let drivers = Arc::new(AgentBrowserFactory::new(config.browser.clone()));
        let supervisor = TaskSupervisor::new(config, chat.clone(), drivers);
        Ok(Self::new(supervisor, chat))
    }

    /// Run the REPL until `exit` or EOF, then stop every task
    pub async fn run(self) -> Result<()> {
        self.print_banner();

        match self.chat.is_available().await {
            Ok(true) => {}
            Ok(false) => {
                println!("Model '{}' is not available. Tasks will fail.", self.chat.model());
                println!("   Type 'models' to see what the provider serves.\n");
            }
            Err(e) => println!("Cannot check model availability: {}\n", e),
        }

        if !AgentBrowserDriver::is_available().await {
            println!("agent-browser not found. Tasks will fail to open a browser session.");
            println!("   To enable: npm install -g agent-browser && agent-browser install\n");
        }

        let events = self.supervisor.events();
        let printer = tokio::spawn(async move {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                println!("{}", format_event(&event));
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = io::stdout();

        loop {
            print!("> ");
            stdout.flush()?;

            let input = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    // EOF (Ctrl+D)
                    println!();
                    break;
                }
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            };

            match handle_command(&input, &self.supervisor, &self.chat).await {
                Ok(CommandResult::Exit) => break,
                Ok(CommandResult::Handled(output)) => println!("{}\n", output),
                Ok(CommandResult::None) => {}
                Err(e) => eprintln!("Error: {}\n", e),
            }
        }

        println!("Stopping tasks...");
        self.supervisor.shutdown().await;
        // the event stream ends once the last supervisor handle is gone
        drop(self);
        let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;
        println!("Goodbye!");
        Ok(())
    }

    fn print_banner(&self) {
        let config = self.supervisor.config();
        println!("agent-executive {}", env!("CARGO_PKG_VERSION"));
        println!("Provider:   {:?} ({})", config.provider.kind, config.provider.model);
        println!(
            "Tasks:      up to {} at once, overflow {:?}",
            self.supervisor.capacity(),
            config.supervisor.overflow
        );
        println!("Browser:    {}", if config.browser.headed { "headed" } else { "headless" });
        println!();
        println!("Commands: start, list, status, cancel, reply, reap, models, config, help, exit");
        println!("─────────────────────────────────────────────────────────────");
    }
}

/// One-line rendering of an event
pub fn format_event(event: &TaskEvent) -> String {
    let marker = match (event.kind, event.status) {
        (TaskEventKind::Question, _) => "?",
        (_, TaskStatus::Completed) => "+",
        (_, TaskStatus::Failed) => "!",
        (_, TaskStatus::Cancelled) => "x",
        _ => "-",
    };
    let mut line = format!(
        "[{}] #{} {} {}: {}",
        event.at.format("%H:%M:%S"),
        event.task_id,
        marker,
        event.phase,
        event.summary
    );
    if event.kind == TaskEventKind::Question {
        line.push_str(&format!("  (answer with: reply {} <text>)", event.task_id));
    }
    if let Some(ref shot) = event.screenshot {
        line.push_str(&format!(" [{}]", shot));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LoopPhase, TaskId};
    use chrono::Utc;

    fn event(kind: TaskEventKind, phase: LoopPhase, status: TaskStatus) -> TaskEvent {
        TaskEvent {
            task_id: TaskId(3),
            kind,
            phase,
            status,
            summary: "Example Domain".to_string(),
            screenshot: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_format_completed_event() {
        let line = format_event(&event(
            TaskEventKind::Transition,
            LoopPhase::Completed,
            TaskStatus::Completed,
        ));
        assert!(line.contains("#3 + completed: Example Domain"));
    }

    #[test]
    fn test_format_question_event() {
        let line = format_event(&event(
            TaskEventKind::Question,
            LoopPhase::Acting,
            TaskStatus::WaitingOnUser,
        ));
        assert!(line.contains("#3 ? acting"));
        assert!(line.ends_with("(answer with: reply 3 <text>)"));
    }
}
