//! # agentpulse-core
//!
//! Core library for agentpulse - a running/idle monitor for coding agents.
//!
//! This library provides:
//! - Log source providers that map live agent processes to their session logs
//! - Incremental tail classification of JSONL session logs
//! - Status snapshots published on change
//! - Windowed utilization and throughput metrics over recent sessions
//! - A loopback HTTP/WebSocket API serving those metrics
//!
//! ## Architecture
//!
//! Two read paths share the same per-agent log formats:
//! - **Status:** process table → active log per pid → backward tail scan →
//!   [`StatusSnapshot`]
//! - **Metrics:** every log touched in the last week → forward decode →
//!   tasks, responses and segments → [`MetricsSummary`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentpulse_core::provider::{providers_from_config, SystemProcessTable};
//! use agentpulse_core::{Config, StatusEvaluator};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let table = Arc::new(SystemProcessTable::new());
//! let mut evaluator = StatusEvaluator::new(providers_from_config(&config.providers, table));
//! println!("{}", evaluator.evaluate().summary_line());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{MetricsAggregator, MetricsSummary};
pub use monitor::StatusMonitor;
pub use server::{ApiServer, ApiState};
pub use status::{StatusEvaluator, StatusSnapshot};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod provider;
pub mod server;
pub mod status;
pub mod tracker;
pub mod types;
