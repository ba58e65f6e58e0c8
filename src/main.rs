//! agent-executive - LLM-driven browser automation
//!
//! Main entry point for the CLI application.

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_executive::browser::AgentBrowserFactory;
use agent_executive::cli::commands::format_status;
use agent_executive::cli::repl::PRINTER_DRAIN;
use agent_executive::config::{OverflowPolicy, ProviderKind};
use agent_executive::llm::ChatModel;
use agent_executive::{
    format_event, AgentError, Config, Repl, TaskRequest, TaskStatus, TaskSupervisor,
};

/// agent-executive - drive a browser toward a goal with an LLM
#[derive(Parser, Debug)]
#[command(name = "agent-executive")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run a single task to completion instead of starting the REPL
    #[arg(long, short = 'g')]
    goal: Option<String>,

    /// Role the model should act as
    #[arg(long, short = 'r', default_value = "web browsing assistant")]
    role: String,

    /// Page to open before the first observation
    #[arg(long, short = 'u')]
    url: Option<String>,

    /// Model provider (ollama, openai)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Model name
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Maximum tasks running at once
    #[arg(long)]
    max_tasks: Option<usize>,

    /// Reject new tasks at capacity instead of queueing them
    #[arg(long)]
    reject_overflow: bool,

    /// Run in headed browser mode (visible window)
    #[arg(long)]
    headed: bool,

    /// Enable debug logging
    #[arg(long, short = 'd')]
    debug: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.default_filter().into());
    let json = config.logging.json;

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load()?;

    // Apply CLI overrides
    if let Some(provider) = args.provider {
        config.provider.kind = provider;
    }
    if let Some(ref model) = args.model {
        config.provider.model = model.clone();
    }
    if let Some(max) = args.max_tasks {
        config.supervisor.max_concurrent_tasks = max;
    }
    if args.reject_overflow {
        config.supervisor.overflow = OverflowPolicy::Reject;
    }
    if args.headed {
        config.browser.headed = true;
    }
    if args.debug {
        config.logging.debug = true;
    }

    init_tracing(&config);

    if args.init_config {
        let path = config.save()?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    // Single task mode
    if let Some(goal) = args.goal {
        let chat = Arc::new(ChatModel::from_config(&config.provider)?);
        if !chat.is_available().await? {
            return Err(AgentError::ModelNotFound(chat.model().to_string()).into());
        }
        let drivers = Arc::new(AgentBrowserFactory::new(config.browser.clone()));
        let supervisor = TaskSupervisor::new(config, chat, drivers);
        let mut request = TaskRequest::new(goal, args.role);
        if let Some(url) = args.url {
            request = request.with_start_url(url);
        }

        let events = supervisor.events();
        let printer = tokio::spawn(async move {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                println!("{}", format_event(&event));
            }
        });

        let id = supervisor.start_task(request)?;
        info!(task_id = %id, "Running single task");

        let snapshot = tokio::select! {
            snapshot = supervisor.wait(id) => snapshot?,
            _ = tokio::signal::ctrl_c() => {
                supervisor.cancel(id)?;
                supervisor.wait(id).await?
            }
        };
        supervisor.shutdown().await;
        drop(supervisor);
        let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;

        println!("\n{}", format_status(&snapshot));
        if snapshot.status != TaskStatus::Completed {
            bail!("task #{} ended {}", id, snapshot.status);
        }
        return Ok(());
    }

    // Interactive REPL mode
    let repl = Repl::with_config(config)?;
    repl.run().await?;

    Ok(())
}
