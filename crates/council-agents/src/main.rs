use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coordination::events::{STAGE_DONE, STAGE_ERROR};
use coordination::WorkflowOrchestrator;
use council_agents::AppConfig;

#[derive(Parser)]
#[command(name = "council", about = "Ask the analyst council a question")]
struct Cli {
    /// The question to analyze
    query: String,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated analysts to consult (default: all configured)
    #[arg(short, long, value_delimiter = ',')]
    agents: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries only the event stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if !cli.agents.is_empty() {
        config.restrict_analysts(&cli.agents)?;
    }
    info!(
        endpoint = %config.provider.base_url,
        model = %config.provider.model,
        analysts = ?config.analysts,
        "Council starting"
    );

    let collaborators = council_agents::collaborators(&config)?;
    let orchestrator = WorkflowOrchestrator::new(config.engine, collaborators);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            ctrl_c.cancel();
        }
    });

    let mut events = orchestrator.run_workflow_with_cancel(cli.query, cancel);
    let mut stdout = std::io::stdout().lock();
    let mut last_stage = None;
    while let Some(event) = events.next().await {
        let line = serde_json::to_string(&event).context("Failed to encode event")?;
        writeln!(stdout, "{line}").context("Failed to write event")?;
        last_stage = Some(event.stage);
    }
    stdout.flush()?;

    match last_stage.as_deref() {
        Some(STAGE_DONE) => Ok(()),
        Some(STAGE_ERROR) => anyhow::bail!("workflow ended with an error"),
        _ => anyhow::bail!("event stream closed without a terminal event"),
    }
}
