//! agentpulse - coding agent activity monitor
//!
//! Watches live Claude Code and Codex processes, prints a line whenever the
//! running/idle picture changes, and serves windowed metrics on a loopback
//! HTTP/WebSocket API.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/agentpulse/config.toml (~/.config/agentpulse/config.toml)
//! - Logs: $XDG_STATE_HOME/agentpulse/agentpulse.log (~/.local/state/agentpulse/agentpulse.log)
//! - Discovery: $XDG_CONFIG_HOME/agentpulse/server.json

use agentpulse_core::provider::{formats_from_config, providers_from_config, SystemProcessTable};
use agentpulse_core::{
    ApiServer, ApiState, Config, MetricsAggregator, StatusEvaluator, StatusMonitor,
    StatusSnapshot,
};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "agentpulse")]
#[command(about = "Watch coding agents and serve activity metrics")]
#[command(version)]
struct Args {
    /// First port to try for the API server
    #[arg(long)]
    port: Option<u16>,

    /// Run the status monitor only
    #[arg(long)]
    no_server: bool,

    /// Directory of dashboard assets to serve at /
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll: Option<u64>,

    /// Verbose output (-v lists agents on every change)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.no_server {
            config.server.enabled = false;
        }
        if let Some(dir) = &self.static_dir {
            config.server.static_dir = Some(dir.clone());
        }
        if let Some(poll) = self.poll {
            config.status.poll_interval_ms = poll;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let _log_guard =
        agentpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("agentpulse starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(&args, config));

    tracing::info!("agentpulse shutting down");
    result
}

async fn run(args: &Args, config: Config) -> Result<()> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        let _ = stop_tx.send(true);
    })
    .context("failed to set Ctrl+C handler")?;

    let providers = providers_from_config(&config.providers, Arc::new(SystemProcessTable::new()));
    let watch_roots = providers
        .iter()
        .filter_map(|p| p.format().log_root())
        .collect();
    let monitor = StatusMonitor::start(StatusEvaluator::new(providers), &config.status, watch_roots)
        .context("failed to start status monitor")?;

    let server = if config.server.enabled {
        let metrics = Arc::new(MetricsAggregator::new(
            formats_from_config(&config.providers),
            config.metrics.clone(),
        ));
        let state = ApiState::new(
            metrics,
            Duration::from_secs(config.server.push_interval_secs),
        )
        .with_status(monitor.subscribe())
        .with_static_dir(config.server.static_dir.clone());

        match ApiServer::start(&config.server, state).await {
            Ok(server) => {
                println!("API listening on http://{}", server.local_addr());
                Some(server)
            }
            Err(e) => {
                eprintln!("API server not started: {}", e);
                None
            }
        }
    } else {
        None
    };

    println!(
        "Watching agents (poll every {}ms). Press Ctrl+C to stop.",
        config.status.poll_interval_ms
    );

    let mut status_rx = monitor.subscribe();
    let initial = status_rx.borrow_and_update().clone();
    print_status(&initial, args.verbose);
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status_rx.borrow_and_update().clone();
                print_status(&snapshot, args.verbose);
            }
            _ = stop_rx.changed() => break,
        }
    }

    if let Some(server) = server {
        server.shutdown().await;
    }
    drop(monitor);

    Ok(())
}

fn print_status(snapshot: &StatusSnapshot, verbose: u8) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    println!("[{}] {}", timestamp, snapshot.summary_line());

    if verbose == 0 {
        return;
    }
    for agent in snapshot.running_agents.iter().chain(&snapshot.idle_agents) {
        let message = agent.last_user_message.as_deref().unwrap_or("");
        println!(
            "  {:<8} {:<12} pid {:<7} {}",
            agent.turn_state.as_str(),
            agent.kind.display_name(),
            agent.pid,
            message
        );
    }
}
