//! Status evaluation: merge every provider's agent states into one snapshot.

use crate::provider::LogSourceProvider;
use crate::types::{AgentState, TurnState};
use serde::Serialize;

/// Aggregate running/idle view over all live agents.
///
/// Recomputed from scratch each poll and compared by value, so observers
/// only hear about real changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub running_count: usize,
    pub finished_count: usize,
    pub total_count: usize,
    /// Share of agents that finished their turn, 0–100
    pub progress_percent: f64,
    /// Most recently prompted first
    pub running_agents: Vec<AgentState>,
    /// Most recently finished first
    pub idle_agents: Vec<AgentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_recent_finished_pid: Option<u32>,
}

impl StatusSnapshot {
    /// One-line human summary, e.g. `2 running, 1 idle (33%)`.
    pub fn summary_line(&self) -> String {
        format!(
            "{} running, {} idle ({:.0}%)",
            self.running_count, self.finished_count, self.progress_percent
        )
    }
}

/// Build a snapshot from a flat list of agent states.
pub fn build_snapshot(states: Vec<AgentState>) -> StatusSnapshot {
    let (mut running, mut idle): (Vec<_>, Vec<_>) = states
        .into_iter()
        .partition(|s| s.turn_state == TurnState::Running);

    // Newest first; pid breaks ties so ordering is stable between polls
    running.sort_by(|a, b| b.last_user_at.cmp(&a.last_user_at).then(a.pid.cmp(&b.pid)));
    idle.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then(a.pid.cmp(&b.pid)));

    let total = running.len() + idle.len();
    let progress_percent = if total == 0 {
        0.0
    } else {
        idle.len() as f64 / total as f64 * 100.0
    };
    let most_recent_finished_pid = idle
        .iter()
        .find(|s| s.finished_at.is_some())
        .map(|s| s.pid);

    StatusSnapshot {
        running_count: running.len(),
        finished_count: idle.len(),
        total_count: total,
        progress_percent,
        running_agents: running,
        idle_agents: idle,
        most_recent_finished_pid,
    }
}

/// Owns all providers and turns one poll into one snapshot.
pub struct StatusEvaluator {
    providers: Vec<LogSourceProvider>,
}

impl StatusEvaluator {
    pub fn new(providers: Vec<LogSourceProvider>) -> Self {
        Self { providers }
    }

    /// Poll every provider and merge the results.
    pub fn evaluate(&mut self) -> StatusSnapshot {
        let states: Vec<AgentState> = self
            .providers
            .iter_mut()
            .flat_map(|provider| provider.poll())
            .collect();
        let snapshot = build_snapshot(states);
        tracing::debug!(
            running = snapshot.running_count,
            finished = snapshot.finished_count,
            "Status evaluated"
        );
        snapshot
    }
}
