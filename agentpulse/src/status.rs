//! agentpulse-status - print the current running/idle snapshot as JSON
//!
//! Runs one evaluation over the live process table and exits.

use agentpulse_core::provider::{providers_from_config, SystemProcessTable};
use agentpulse_core::{Config, StatusEvaluator};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "agentpulse-status")]
#[command(about = "Print which coding agents are running or idle")]
#[command(version)]
struct Args {
    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        agentpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let providers = providers_from_config(&config.providers, Arc::new(SystemProcessTable::new()));
    let mut evaluator = StatusEvaluator::new(providers);
    let snapshot = evaluator.evaluate();

    tracing::info!(
        running = snapshot.running_count,
        finished = snapshot.finished_count,
        "Status evaluated"
    );

    let json = if args.compact {
        serde_json::to_string(&snapshot)
    } else {
        serde_json::to_string_pretty(&snapshot)
    }
    .context("failed to serialize snapshot")?;
    println!("{}", json);

    Ok(())
}
