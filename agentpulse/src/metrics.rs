//! agentpulse-metrics - print windowed activity metrics as JSON
//!
//! Decodes every session log touched in the last week and prints the same
//! summary the API serves at `/api/summary`, a single window of it, or a
//! timeseries.

use agentpulse_core::provider::formats_from_config;
use agentpulse_core::{Config, MetricsAggregator, WindowKey};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "agentpulse-metrics")]
#[command(about = "Print utilization and throughput metrics for coding agents")]
#[command(version)]
struct Args {
    /// Window to report: 1h, 24h or 7d (default: all windows)
    #[arg(short, long)]
    window: Option<WindowKey>,

    /// Timeseries step in seconds (only with --timeseries)
    #[arg(long)]
    step: Option<u64>,

    /// Print the running/total timeseries instead of the summary
    #[arg(long)]
    timeseries: bool,

    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn print_json<T: Serialize + ?Sized>(value: &T, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("failed to serialize metrics")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        agentpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let aggregator =
        MetricsAggregator::new(formats_from_config(&config.providers), config.metrics.clone());

    if args.timeseries {
        let window = args.window.unwrap_or(config.metrics.default_window);
        let series = aggregator.timeseries(window, args.step);
        tracing::info!(window = %window, points = series.points.len(), "Timeseries computed");
        return print_json(&series, args.compact);
    }

    let summary = aggregator.summary();
    match args.window {
        Some(window) => {
            let entry = summary
                .windows
                .get(&window)
                .with_context(|| format!("no metrics for window {}", window))?;
            print_json(entry, args.compact)
        }
        None => print_json(&*summary, args.compact),
    }
}
