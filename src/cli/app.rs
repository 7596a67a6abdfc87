// ABOUTME: Application entry: logging setup, config resolution, dispatch
// ABOUTME: The run subcommand drives the engine without the HTTP layer

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::actions::Action;
use crate::api::{server, AppState};
use crate::cli::args::{Cli, Command};
use crate::cli::config::Config;
use crate::engine::TaskExecutor;
use crate::registry::{TaskSpec, TaskStatus};

/// A one-shot task file for the run subcommand.
#[derive(Debug, Deserialize)]
struct TaskFile {
    /// Entry page to open before the actions run; empty skips navigation.
    #[serde(default)]
    url: String,
    actions: Vec<Action>,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging.level);

    match cli.command {
        None | Some(Command::Serve { port: None }) => server::run(config).await,
        Some(Command::Serve { port: Some(port) }) => {
            config.api.port = port;
            server::run(config).await
        }
        Some(Command::Run { file, simulate }) => {
            if simulate {
                config.browser.executable_path = String::new();
                config.simulation.enabled = true;
            }
            run_task_file(config, &file).await
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("webpilot={level},info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Execute one task synchronously and print the finished record.
async fn run_task_file(config: Config, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: TaskFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw).context("invalid task file")?
    } else {
        serde_yaml::from_str(&raw).context("invalid task file")?
    };
    anyhow::ensure!(!file.actions.is_empty(), "task file has no actions");

    let state = AppState::new(config);
    let executor = TaskExecutor::new(
        state.registry.clone(),
        state.broadcaster.clone(),
        state.sessions.clone(),
        state.controller.clone(),
        (*state.config).clone(),
    );

    let task = state.registry.create(TaskSpec {
        url: file.url,
        actions: file.actions,
        priority: 0,
        // One-shot runs do not retry themselves.
        max_retries: 0,
        headless: state.config.browser.headless,
        metadata: serde_json::Value::Null,
    });

    let claimed = state
        .registry
        .claim_next_pending()
        .context("task was not claimable")?;
    executor.execute(claimed).await;

    let finished = state.registry.get(&task.id)?;
    println!("{}", serde_json::to_string_pretty(&finished)?);

    anyhow::ensure!(
        finished.status == TaskStatus::Completed,
        "task finished as {}",
        finished.status.as_str()
    );
    Ok(())
}
