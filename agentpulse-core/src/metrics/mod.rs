//! Historical metrics over recent session logs.
//!
//! Unlike the status path, which only looks at the tail of live logs, the
//! aggregator decodes every log touched within the largest window and
//! computes windowed statistics:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `activeUtilization` | running seconds / observed seconds |
//! | `idleOverThreshold` | share of occupied steps at or above the idle threshold |
//! | `throughputPerHour` | completed tasks per hour |
//! | `taskSupplyRate` | assignments per hour |
//! | `bottleneckIndex` | median response time / median task runtime |
//! | `fragmentation` | mean prompts per task |
//! | `reworkRate` | reworked tasks / tasks |
//! | `longTailRuntimeSeconds` | p95 task runtime |
//!
//! Summaries are cached for a short TTL. Concurrent cache misses may each
//! recompute; the computation is side-effect free.

pub mod reduce;
pub mod session;
pub mod stats;
pub mod window;

pub use reduce::{
    reduce_session, AssignmentStat, ResponseStat, ReworkStat, SessionStats, TaskStat,
};
pub use session::{load_sessions, MetricsSession};
pub use stats::{histogram, percentile, HistogramBucket, HISTOGRAM_EDGES_MINUTES};
pub use window::{build_segments, MetricsWindow, Segment, Timeseries, TimeseriesPoint};

use crate::config::MetricsConfig;
use crate::provider::format::AgentLogFormat;
use crate::types::{TurnKind, WindowKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Smallest timeseries step accepted from clients.
pub const MIN_STEP_SECONDS: u64 = 10;

/// Settings echoed back with every summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConfig {
    pub idle_threshold_percent: f64,
    pub step_seconds: u64,
    pub default_window: WindowKey,
    pub windows: Vec<WindowKey>,
    pub rework_window_seconds: i64,
    pub rework_min_shared_tokens: usize,
    pub rework_min_overlap_ratio: f64,
}

impl From<&MetricsConfig> for SummaryConfig {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            idle_threshold_percent: config.idle_threshold_percent,
            step_seconds: config.step_seconds,
            default_window: config.default_window,
            windows: WindowKey::ALL.to_vec(),
            rework_window_seconds: config.rework.window_secs,
            rework_min_shared_tokens: config.rework.min_shared_tokens,
            rework_min_overlap_ratio: config.rework.min_overlap_ratio,
        }
    }
}

/// Sessions active in the last 24 hours, split by their last turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentCounts {
    pub session_count: usize,
    pub running: usize,
    pub idle: usize,
    pub running_ratio: f64,
}

/// The full computed response of `/api/summary`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub generated_at: DateTime<Utc>,
    pub config: SummaryConfig,
    pub current: CurrentCounts,
    pub windows: BTreeMap<WindowKey, MetricsWindow>,
}

pub fn current_counts(sessions: &[MetricsSession], now: DateTime<Utc>) -> CurrentCounts {
    let since = now - chrono::Duration::hours(24);
    let mut counts = CurrentCounts::default();

    for last in sessions.iter().filter_map(|s| s.last_event()) {
        if last.timestamp < since {
            continue;
        }
        counts.session_count += 1;
        match last.kind {
            TurnKind::User => counts.running += 1,
            TurnKind::Assistant => counts.idle += 1,
        }
    }
    if counts.session_count > 0 {
        counts.running_ratio = counts.running as f64 / counts.session_count as f64;
    }
    counts
}

/// Reduce every session and merge the results.
pub fn reduce_all(sessions: &[MetricsSession], config: &MetricsConfig) -> SessionStats {
    let mut all = SessionStats::default();
    for session in sessions {
        all.extend(reduce_session(&session.events, &config.rework));
    }
    all
}

/// Compute a summary over already-loaded sessions.
pub fn summarize(
    sessions: &[MetricsSession],
    stats: &SessionStats,
    config: &MetricsConfig,
    now: DateTime<Utc>,
) -> MetricsSummary {
    let inputs = window::WindowInputs {
        sessions,
        stats,
        now,
        step_seconds: config.step_seconds,
        idle_threshold_percent: config.idle_threshold_percent,
    };

    let windows = WindowKey::ALL
        .iter()
        .map(|&key| (key, window::compute_window(key, &inputs)))
        .collect();

    MetricsSummary {
        generated_at: now,
        config: SummaryConfig::from(config),
        current: current_counts(sessions, now),
        windows,
    }
}

/// Clamp a requested step to `[MIN_STEP_SECONDS, window length]`.
pub fn clamp_step(window: WindowKey, step: u64) -> u64 {
    let max = window.duration().num_seconds().max(MIN_STEP_SECONDS as i64) as u64;
    step.clamp(MIN_STEP_SECONDS, max)
}

/// A computed summary plus the inputs it was computed from.
#[derive(Clone)]
struct Computed {
    at: Instant,
    sessions: Arc<Vec<MetricsSession>>,
    stats: Arc<SessionStats>,
    summary: Arc<MetricsSummary>,
}

/// Loads sessions and serves cached summaries and timeseries.
pub struct MetricsAggregator {
    formats: Vec<Arc<dyn AgentLogFormat>>,
    config: MetricsConfig,
    ttl: Duration,
    cache: Mutex<Option<Computed>>,
}

impl MetricsAggregator {
    pub fn new(formats: Vec<Arc<dyn AgentLogFormat>>, config: MetricsConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self {
            formats,
            config,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn cached(&self) -> Option<Computed> {
        let guard = self.cache.lock().ok()?;
        guard
            .as_ref()
            .filter(|c| c.at.elapsed() < self.ttl)
            .cloned()
    }

    fn computed(&self) -> Computed {
        if let Some(hit) = self.cached() {
            return hit;
        }

        let started = Instant::now();
        let now = Utc::now();
        let sessions = load_sessions(&self.formats, now - WindowKey::largest().duration());
        let stats = reduce_all(&sessions, &self.config);
        let summary = summarize(&sessions, &stats, &self.config, now);

        let computed = Computed {
            at: Instant::now(),
            sessions: Arc::new(sessions),
            stats: Arc::new(stats),
            summary: Arc::new(summary),
        };
        tracing::debug!(
            sessions = computed.sessions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Metrics summary computed"
        );

        if let Ok(mut guard) = self.cache.lock() {
            *guard = Some(computed.clone());
        }
        computed
    }

    /// The current summary, recomputed when the cache has expired.
    pub fn summary(&self) -> Arc<MetricsSummary> {
        self.computed().summary
    }

    /// Timeseries for `window` at `step` seconds (configured step when `None`).
    pub fn timeseries(&self, window: WindowKey, step: Option<u64>) -> Timeseries {
        let computed = self.computed();
        let step = clamp_step(window, step.unwrap_or(self.config.step_seconds));
        let now = computed.summary.generated_at;
        let start = now - window.duration();
        let per_session = window::window_segments(&computed.sessions, start, now);
        window::build_timeseries(window, &per_session, start, now, step)
    }
}
