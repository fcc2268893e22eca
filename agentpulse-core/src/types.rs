//! Core domain types for agentpulse
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Agent** | A live coding-agent process (Claude Code, Codex) identified by pid |
//! | **Turn** | One exchange unit attributed to the human operator (user) or the agent (assistant) |
//! | **Task** | The span from a user turn to the assistant turn that closes it |
//! | **Assignment** | A single user turn handed to an agent |
//! | **Window** | A trailing lookback (1h / 24h / 7d) for aggregate metrics |
//!
//! Types that cross the HTTP API serialize with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Agents
// ============================================

/// A coding-agent product whose logs we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ClaudeCode,
    Codex,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude_code",
            AgentKind::Codex => "codex",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "Claude Code",
            AgentKind::Codex => "Codex",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_code" | "claude" => Ok(AgentKind::ClaudeCode),
            "codex" => Ok(AgentKind::Codex),
            _ => Err(format!("unknown agent kind: {}", s)),
        }
    }
}

/// A session log file as seen on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLogFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl SessionLogFile {
    /// Stat a path. Returns `None` when the file is gone or unreadable.
    pub fn stat(path: PathBuf) -> Option<Self> {
        let metadata = std::fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified_at = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        Some(Self {
            path,
            size: metadata.len(),
            modified_at,
        })
    }
}

// ============================================
// Turns
// ============================================

/// Who produced a classified turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    User,
    Assistant,
}

impl TurnKind {
    /// A session whose latest turn is a user turn is working on it.
    pub fn is_running(&self) -> bool {
        matches!(self, TurnKind::User)
    }
}

/// Public running/idle signal for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    Running,
    Finished,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Running => "running",
            TurnState::Finished => "finished",
        }
    }
}

/// A provider's public view of one live agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Stable within a process lifetime: `{kind}-{pid}`
    pub id: String,
    pub kind: AgentKind,
    pub pid: u32,
    pub turn_state: TurnState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    pub log_path: PathBuf,
}

/// One user or assistant turn decoded from a log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TurnKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ============================================
// Windows
// ============================================

/// A fixed trailing lookback for aggregate metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum WindowKey {
    #[serde(rename = "1h")]
    Hour,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl WindowKey {
    /// All windows, shortest first.
    pub const ALL: [WindowKey; 3] = [WindowKey::Hour, WindowKey::Day, WindowKey::Week];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKey::Hour => "1h",
            WindowKey::Day => "24h",
            WindowKey::Week => "7d",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            WindowKey::Hour => chrono::Duration::hours(1),
            WindowKey::Day => chrono::Duration::hours(24),
            WindowKey::Week => chrono::Duration::days(7),
        }
    }

    pub fn hours(&self) -> f64 {
        self.duration().num_seconds() as f64 / 3600.0
    }

    /// The longest configured lookback; bounds which files are loaded.
    pub fn largest() -> WindowKey {
        WindowKey::Week
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WindowKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(WindowKey::Hour),
            "24h" => Ok(WindowKey::Day),
            "7d" => Ok(WindowKey::Week),
            _ => Err(format!("unknown window: {}", s)),
        }
    }
}
