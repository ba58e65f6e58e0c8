//! REPL commands
//!
//! Each line typed into the REPL is one supervisor operation.

use crate::agent::{TaskRequest, TaskSnapshot, TaskSupervisor};
use crate::core::{Result, TaskId};
use crate::llm::ChatModel;

/// Result of handling a command
pub enum CommandResult {
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// No output needed
    None,
}

/// Parse and run one REPL command
pub async fn handle_command(
    input: &str,
    supervisor: &TaskSupervisor,
    chat: &ChatModel,
) -> Result<CommandResult> {
    let input = input.trim();
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0].trim_start_matches('/').to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd.as_str() {
        "" => Ok(CommandResult::None),

        "exit" | "quit" | "q" => Ok(CommandResult::Exit),

        "help" | "?" => Ok(CommandResult::Handled(help_text())),

        "start" | "run" => {
            let Some(request) = parse_start_args(args) else {
                return Ok(CommandResult::Handled(
                    "Usage: start <goal> | <role> [| <url>]".to_string(),
                ));
            };
            let id = supervisor.start_task(request)?;
            Ok(CommandResult::Handled(format!("Started task #{}", id)))
        }

        "list" | "ls" => {
            let tasks = supervisor.list();
            if tasks.is_empty() {
                return Ok(CommandResult::Handled("No tasks.".to_string()));
            }
            let lines: Vec<String> = tasks.iter().map(TaskSnapshot::one_line).collect();
            Ok(CommandResult::Handled(format!(
                "{}\n({} of {} slots in use)",
                lines.join("\n"),
                supervisor.running(),
                supervisor.capacity()
            )))
        }

        "status" => {
            let Some(id) = parse_id(args) else {
                return Ok(CommandResult::Handled("Usage: status <id>".to_string()));
            };
            let snapshot = supervisor.status(id)?;
            Ok(CommandResult::Handled(format_status(&snapshot)))
        }

        "cancel" | "stop" => {
            let Some(id) = parse_id(args) else {
                return Ok(CommandResult::Handled("Usage: cancel <id>".to_string()));
            };
            supervisor.cancel(id)?;
            Ok(CommandResult::Handled(format!("Cancelling task #{}", id)))
        }

        "reply" | "answer" => {
            let mut split = args.splitn(2, ' ');
            let id = split.next().and_then(parse_id);
            let text = split.next().map(str::trim).unwrap_or("");
            match id {
                Some(id) if !text.is_empty() => {
                    supervisor.reply(id, text)?;
                    Ok(CommandResult::Handled(format!("Sent reply to task #{}", id)))
                }
                _ => Ok(CommandResult::Handled("Usage: reply <id> <text>".to_string())),
            }
        }

        "reap" => {
            let removed = supervisor.reap();
            if removed.is_empty() {
                return Ok(CommandResult::Handled("Nothing to reap.".to_string()));
            }
            let ids: Vec<String> = removed.iter().map(|id| format!("#{}", id)).collect();
            Ok(CommandResult::Handled(format!("Removed {}", ids.join(", "))))
        }

        "models" => {
            let models = chat.provider().list_models().await?;
            Ok(CommandResult::Handled(format_models(&models, chat.model())))
        }

        "config" => {
            let mut config = supervisor.config().clone();
            if config.provider.api_key.is_some() {
                config.provider.api_key = Some("********".to_string());
            }
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| crate::core::AgentError::Other(e.to_string()))?;
            Ok(CommandResult::Handled(rendered))
        }

        _ => Ok(CommandResult::Handled(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ))),
    }
}

/// Parse `<goal> | <role> [| <url>]`
pub fn parse_start_args(args: &str) -> Option<TaskRequest> {
    let mut fields = args.split('|').map(str::trim);
    let goal = fields.next().filter(|g| !g.is_empty())?;
    let role = fields.next().filter(|r| !r.is_empty())?;
    let request = TaskRequest::new(goal, role);
    Some(match fields.next() {
        Some(url) => request.with_start_url(url),
        None => request,
    })
}

fn parse_id(arg: &str) -> Option<TaskId> {
    arg.trim().parse().ok()
}

/// Provider's model list with the configured one marked
pub fn format_models(models: &[String], current: &str) -> String {
    let listed: Vec<String> = models
        .iter()
        .map(|m| {
            let marker = if m == current { "*" } else { "-" };
            format!("  {} {}", marker, m)
        })
        .collect();
    let mut out = format!("Available models:\n{}\n\nCurrent: {}", listed.join("\n"), current);
    if !models.iter().any(|m| m == current) {
        out.push_str(" (not served by this provider)");
    }
    out
}

/// Multi-line status view
pub fn format_status(snapshot: &TaskSnapshot) -> String {
    let mut out = format!(
        "Task #{}\n\
         ─────────────────────────────\n\
         Goal:       {}\n\
         Role:       {}\n\
         Status:     {} ({})\n\
         Iteration:  {}\n\
         History:    {} entries\n",
        snapshot.id,
        snapshot.goal,
        snapshot.role,
        snapshot.status,
        snapshot.phase,
        snapshot.iteration,
        snapshot.history_len,
    );

    if let Some(percent) = snapshot.progress {
        out.push_str(&format!("Progress:   {}%\n", percent));
    }
    if let Some(ref url) = snapshot.start_url {
        out.push_str(&format!("Start URL:  {}\n", url));
    }
    if let Some(ref obs) = snapshot.latest_observation {
        out.push_str(&format!("Page:       {} ({})\n", obs.title, obs.url));
        if let Some(ref shot) = obs.screenshot {
            out.push_str(&format!("Screenshot: {}\n", shot));
        }
    }
    if let Some(ref question) = snapshot.pending_question {
        out.push_str(&format!("Question:   {}\n", question));
    }
    if let Some(ref summary) = snapshot.summary {
        out.push_str(&format!("Result:     {}\n", summary));
    }
    if let Some(ref error) = snapshot.error {
        out.push_str(&format!("Error:      {}\n", error));
    }

    if !snapshot.log.is_empty() {
        out.push_str("\nRecent log:\n");
        for entry in snapshot.log.iter().rev().take(10).rev() {
            out.push_str(&format!("  {}\n", entry));
        }
    }
    out
}

/// Generate help text
fn help_text() -> String {
    r#"agent-executive commands:
─────────────────────────────────────────────
  start <goal> | <role> [| <url>]   Start a task
  list                              List tasks
  status <id>                       Show one task in detail
  cancel <id>                       Cancel a task
  reply <id> <text>                 Answer a task that asked a question
  reap                              Remove finished tasks
  models                            List the provider's models
  config                            Show the active configuration
  help, ?                           Show this help message
  exit, quit, q                     Cancel all tasks and exit

Example:
  start find the page title | researcher | example.com
─────────────────────────────────────────────"#
        .to_string()
}
