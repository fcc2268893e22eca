//! Log format trait abstraction
//!
//! Each agent kind implements [`AgentLogFormat`] to describe where its logs
//! live, which processes write them, and how a single log line maps onto a
//! user or assistant turn.
//!
//! ## Design Principles
//!
//! 1. **Structural classification**: turns are recognised from role/type
//!    fields of the decoded record, never from free-text matching alone
//! 2. **Resilience**: a line that fails to decode is [`LineClass::Ignored`],
//!    it never aborts a scan
//! 3. **Isolation**: all provider-specific field probing stays behind
//!    [`AgentLogFormat::classify_line`]

use crate::error::{Error, Result};
use crate::types::{AgentKind, ClassifiedEvent, SessionLogFile, TurnKind};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

/// Maximum characters kept from a user prompt for display.
pub const MAX_MESSAGE_CHARS: usize = 120;

/// Outcome of classifying one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// A new instruction from the human operator.
    UserTurn { at: DateTime<Utc>, text: String },
    /// The agent finished (or stopped) working on the current instruction.
    ///
    /// `message_id` is set when the agent writes one message across several
    /// lines; a [`LineClass::ToolCall`] with the same id voids the turn.
    AssistantTurn {
        at: DateTime<Utc>,
        message_id: Option<String>,
    },
    /// The agent issued a tool call and is still working.
    ToolCall { message_id: Option<String> },
    /// Bootstrap preamble, tool results, shell echo, undecodable line.
    Ignored,
}

impl LineClass {
    pub fn into_event(self) -> Option<ClassifiedEvent> {
        match self {
            LineClass::UserTurn { at, text } => Some(ClassifiedEvent {
                timestamp: at,
                kind: TurnKind::User,
                text: Some(text),
            }),
            LineClass::AssistantTurn { at, .. } => Some(ClassifiedEvent {
                timestamp: at,
                kind: TurnKind::Assistant,
                text: None,
            }),
            LineClass::ToolCall { .. } | LineClass::Ignored => None,
        }
    }
}

/// Per-session facts a classifier needs beyond the line itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifyContext {
    /// The session's own system instructions, echoed back as "user" input by
    /// some agents.
    pub instructions: Option<String>,
}

/// Trait implemented by every supported agent log format.
pub trait AgentLogFormat: Send + Sync {
    /// Which agent writes this format
    fn kind(&self) -> AgentKind;

    /// Root directory for this agent's data (e.g., ~/.claude)
    ///
    /// Returns `None` if the path cannot be determined (e.g., $HOME not set).
    fn root_path(&self) -> Option<PathBuf>;

    /// Directory under which live session logs are opened.
    fn log_root(&self) -> Option<PathBuf>;

    /// Glob patterns, relative to [`Self::root_path`], matching session logs.
    fn source_patterns(&self) -> Vec<String>;

    /// Whether a process with this executable name may belong to the agent.
    fn matches_process(&self, name: &str) -> bool;

    /// Extension of session log files (without the dot)
    fn log_extension(&self) -> &'static str {
        "jsonl"
    }

    /// Classify one raw line (without its trailing newline).
    fn classify_line(&self, line: &[u8], ctx: &ClassifyContext) -> LineClass;

    /// Read whatever per-session context the classifier needs.
    ///
    /// Default: none.
    fn classify_context(&self, _path: &Path) -> ClassifyContext {
        ClassifyContext::default()
    }

    /// Session ID for a log file, usually the file stem.
    fn session_id(&self, path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
    }

    /// When the session started: a date/time token in the file name, falling
    /// back to filesystem creation and then modification time.
    fn session_started_at(&self, path: &Path) -> Option<DateTime<Utc>> {
        timestamp_from_file_name(path).or_else(|| {
            let metadata = std::fs::metadata(path).ok()?;
            metadata
                .created()
                .or_else(|_| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        })
    }

    /// Whether `path` is a session log this format owns.
    fn owns_path(&self, path: &Path) -> bool {
        let Some(root) = self.log_root() else {
            return false;
        };
        path.starts_with(&root)
            && path
                .extension()
                .map(|ext| ext == self.log_extension())
                .unwrap_or(false)
    }

    /// Discover all session logs matching [`Self::source_patterns`].
    fn discover_files(&self) -> Result<Vec<SessionLogFile>> {
        let root = match self.root_path() {
            Some(r) => r,
            None => return Ok(vec![]),
        };

        let mut files = Vec::new();

        for pattern in self.source_patterns() {
            let full_pattern = root.join(&pattern);
            let pattern_str = full_pattern.to_string_lossy();

            let entries = glob::glob(&pattern_str).map_err(|e| Error::Parse {
                agent: self.kind().to_string(),
                message: format!("Invalid glob pattern: {}", e),
            })?;

            files.extend(entries.flatten().filter_map(SessionLogFile::stat));
        }

        Ok(files)
    }
}

// ============================================
// Shared helpers
// ============================================

/// Parse an RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reduce a prompt to one display line of at most [`MAX_MESSAGE_CHARS`].
pub fn clip_message(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_MESSAGE_CHARS {
        return collapsed;
    }
    let mut clipped: String = collapsed.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

/// Find a `YYYY-MM-DDTHH-MM-SS` token in a file name, read as local time.
///
/// Codex names its logs `rollout-2025-11-25T00-33-35-<uuid>.jsonl`.
pub fn timestamp_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    const TOKEN_LEN: usize = "2025-11-25T00-33-35".len();

    let stem = path.file_stem()?.to_str()?;
    if !stem.is_ascii() || stem.len() < TOKEN_LEN {
        return None;
    }

    (0..=stem.len() - TOKEN_LEN).find_map(|start| {
        let candidate = &stem[start..start + TOKEN_LEN];
        let naive = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%dT%H-%M-%S").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_clip_message_first_line() {
        assert_eq!(clip_message("\n\n  fix   the\tbuild  \nsecond line"), "fix the build");
        assert_eq!(clip_message(""), "");
    }

    #[test]
    fn test_clip_message_length_bound() {
        let long = "word ".repeat(100);
        let clipped = clip_message(&long);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn test_timestamp_from_file_name() {
        let path = Path::new(
            "/x/sessions/2025/11/25/rollout-2025-11-25T00-33-35-019ab86e-1e83-75b0-b2d7-d335492e7026.jsonl",
        );
        let ts = timestamp_from_file_name(path).expect("token should parse");
        let local = ts.with_timezone(&Local);
        assert_eq!(local.year(), 2025);
        assert_eq!(local.month(), 11);
        assert_eq!(local.day(), 25);
        assert_eq!(local.hour(), 0);
        assert_eq!(local.minute(), 33);
        assert_eq!(local.second(), 35);
    }

    #[test]
    fn test_timestamp_from_file_name_absent() {
        assert!(timestamp_from_file_name(Path::new(
            "b4749c81-937a-4bd4-b62c-9d78905f0975.jsonl"
        ))
        .is_none());
        assert!(timestamp_from_file_name(Path::new("a.jsonl")).is_none());
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2025-11-25T00:33:35.123Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_line_class_into_event() {
        let at = Utc::now();
        let event = LineClass::UserTurn {
            at,
            text: "hi".to_string(),
        }
        .into_event()
        .unwrap();
        assert_eq!(event.kind, TurnKind::User);
        assert_eq!(event.text.as_deref(), Some("hi"));
        assert!(LineClass::Ignored.into_event().is_none());
        assert!(LineClass::ToolCall { message_id: None }.into_event().is_none());

        let event = LineClass::AssistantTurn {
            at,
            message_id: Some("msg_1".to_string()),
        }
        .into_event()
        .unwrap();
        assert_eq!(event.kind, TurnKind::Assistant);
        assert!(event.text.is_none());
    }
}
