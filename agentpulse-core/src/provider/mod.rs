//! Log source providers.
//!
//! A [`LogSourceProvider`] answers one question per poll: which processes of
//! my agent kind are alive right now, which log file is each one writing, and
//! what state does that log say it is in.
//!
//! Resolution works from the process side: enumerate OS processes, keep the
//! ones whose executable name matches the agent, then look through each
//! candidate's open files for a log under the agent's log root. A process
//! with no such file open is not an agent session (e.g. `claude --version`).

pub mod claude;
pub mod codex;
pub mod format;
pub mod process;

pub use claude::ClaudeCodeFormat;
pub use codex::CodexFormat;
pub use format::{AgentLogFormat, ClassifyContext, LineClass};
pub use process::{ProcessEntry, ProcessTable, StaticProcessTable, SystemProcessTable};

use crate::config::ProvidersConfig;
use crate::tracker::SessionTracker;
use crate::types::{AgentKind, AgentState, SessionLogFile};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build the log formats for every supported agent, honouring root overrides.
pub fn formats_from_config(config: &ProvidersConfig) -> Vec<Arc<dyn AgentLogFormat>> {
    let claude = match &config.claude_code_path {
        Some(root) => ClaudeCodeFormat::with_root(root.clone()),
        None => ClaudeCodeFormat::new(),
    };
    let codex = match &config.codex_path {
        Some(root) => CodexFormat::with_root(root.clone()),
        None => CodexFormat::new(),
    };
    vec![Arc::new(claude), Arc::new(codex)]
}

/// Build one provider per supported agent sharing a process table.
pub fn providers_from_config(
    config: &ProvidersConfig,
    table: Arc<dyn ProcessTable>,
) -> Vec<LogSourceProvider> {
    formats_from_config(config)
        .into_iter()
        .map(|format| {
            LogSourceProvider::new(format, Arc::clone(&table))
                .with_path_refresh(Duration::from_secs(config.path_refresh_secs))
        })
        .collect()
}

/// Live process discovery and per-pid tracking for one agent kind.
pub struct LogSourceProvider {
    format: Arc<dyn AgentLogFormat>,
    table: Arc<dyn ProcessTable>,
    trackers: HashMap<u32, SessionTracker>,
    /// pid → resolved log path
    path_cache: HashMap<u32, PathBuf>,
    /// Matching pids at the time `path_cache` was built
    cached_pids: BTreeSet<u32>,
    resolved_at: Option<Instant>,
    path_refresh: Duration,
}

impl LogSourceProvider {
    pub fn new(format: Arc<dyn AgentLogFormat>, table: Arc<dyn ProcessTable>) -> Self {
        Self {
            format,
            table,
            trackers: HashMap::new(),
            path_cache: HashMap::new(),
            cached_pids: BTreeSet::new(),
            resolved_at: None,
            path_refresh: Duration::from_secs(10),
        }
    }

    /// How long a resolved pid → path mapping is trusted.
    pub fn with_path_refresh(mut self, interval: Duration) -> Self {
        self.path_refresh = interval;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.format.kind()
    }

    pub fn format(&self) -> &Arc<dyn AgentLogFormat> {
        &self.format
    }

    /// Number of pids currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.trackers.len()
    }

    /// Resolve live `(pid, log path)` pairs.
    ///
    /// Returns `None` when the OS could not be queried, which callers treat
    /// as "no information" rather than "no agents".
    pub fn live_sessions(&mut self) -> Option<HashMap<u32, PathBuf>> {
        let processes = match self.table.processes() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(agent = %self.kind(), error = %e, "Process enumeration failed");
                return None;
            }
        };

        let pids: BTreeSet<u32> = processes
            .iter()
            .filter(|p| self.format.matches_process(&p.name))
            .map(|p| p.pid)
            .collect();

        let expired = self
            .resolved_at
            .map(|at| at.elapsed() >= self.path_refresh)
            .unwrap_or(true);
        let vanished = self.path_cache.values().any(|p| !p.exists());

        if pids != self.cached_pids || expired || vanished {
            self.path_cache = self.resolve_paths(&pids);
            self.cached_pids = pids;
            self.resolved_at = Some(Instant::now());
        }

        Some(self.path_cache.clone())
    }

    fn resolve_paths(&self, pids: &BTreeSet<u32>) -> HashMap<u32, PathBuf> {
        let mut resolved = HashMap::new();

        for &pid in pids {
            let files = match self.table.open_files(pid) {
                Ok(f) => f,
                Err(e) => {
                    tracing::debug!(agent = %self.kind(), pid, error = %e, "Open file lookup failed");
                    continue;
                }
            };

            let newest = files
                .into_iter()
                .filter(|p| self.format.owns_path(p))
                .filter_map(SessionLogFile::stat)
                .max_by_key(|f| f.modified_at);

            if let Some(log) = newest {
                tracing::debug!(agent = %self.kind(), pid, path = %log.path.display(), "Resolved session log");
                resolved.insert(pid, log.path);
            }
        }

        resolved
    }

    /// One poll cycle: reconcile trackers with live pids and report states.
    ///
    /// Trackers are created for new pids, replaced when a pid's log path
    /// changes, and dropped when the pid disappears. A pid whose log cannot
    /// be read is omitted from this cycle's result.
    pub fn poll(&mut self) -> Vec<AgentState> {
        let Some(sessions) = self.live_sessions() else {
            return Vec::new();
        };

        self.trackers
            .retain(|pid, tracker| sessions.get(pid).map(|p| p.as_path()) == Some(tracker.path()));

        let format = self.format.as_ref();
        for (pid, path) in sessions {
            self.trackers
                .entry(pid)
                .or_insert_with(|| SessionTracker::new(path, format));
        }

        let kind = self.kind();
        let mut pids: Vec<u32> = self.trackers.keys().copied().collect();
        pids.sort_unstable();

        let mut states = Vec::with_capacity(pids.len());
        for pid in pids {
            let Some(tracker) = self.trackers.get_mut(&pid) else {
                continue;
            };
            match tracker.refresh(format) {
                Ok(_) => states.push(tracker.agent_state(kind, pid)),
                Err(e) => {
                    tracing::debug!(
                        agent = %kind,
                        pid,
                        path = %tracker.path().display(),
                        error = %e,
                        "Session log unreadable, skipping"
                    );
                }
            }
        }

        states
    }
}
