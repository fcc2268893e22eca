//! Full forward decode of historical session logs.

use crate::provider::format::{AgentLogFormat, LineClass};
use crate::types::{AgentKind, ClassifiedEvent, SessionLogFile};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

/// Every classified turn of one log file, ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSession {
    pub id: String,
    pub kind: AgentKind,
    pub path: PathBuf,
    pub events: Vec<ClassifiedEvent>,
}

impl MetricsSession {
    /// Decode `path` front to back. Undecodable lines are dropped, as are
    /// assistant turns whose message also issued a tool call.
    pub fn parse(format: &dyn AgentLogFormat, path: PathBuf) -> io::Result<Self> {
        let context = format.classify_context(&path);
        let mut reader = BufReader::new(File::open(&path)?);

        let mut classified: Vec<(ClassifiedEvent, Option<String>)> = Vec::new();
        let mut tool_calls = HashSet::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let trimmed = line.strip_suffix(b"\n").unwrap_or(&line[..]);
            let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
            if trimmed.is_empty() {
                continue;
            }
            match format.classify_line(trimmed, &context) {
                LineClass::ToolCall {
                    message_id: Some(id),
                } => {
                    tool_calls.insert(id);
                }
                class => {
                    let message_id = match &class {
                        LineClass::AssistantTurn { message_id, .. } => message_id.clone(),
                        _ => None,
                    };
                    if let Some(event) = class.into_event() {
                        classified.push((event, message_id));
                    }
                }
            }
        }

        let mut events: Vec<ClassifiedEvent> = classified
            .into_iter()
            .filter(|(_, id)| id.as_ref().map_or(true, |id| !tool_calls.contains(id)))
            .map(|(event, _)| event)
            .collect();

        // Stable sort keeps file order for equal timestamps
        events.sort_by_key(|e| e.timestamp);

        let id = format
            .session_id(&path)
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            id,
            kind: format.kind(),
            path,
            events,
        })
    }

    pub fn last_event(&self) -> Option<&ClassifiedEvent> {
        self.events.last()
    }
}

/// Load every session log modified at or after `since`.
///
/// Missing roots and unreadable files are skipped; sessions without a single
/// classified turn are dropped.
pub fn load_sessions(
    formats: &[Arc<dyn AgentLogFormat>],
    since: DateTime<Utc>,
) -> Vec<MetricsSession> {
    let mut sessions = Vec::new();

    for format in formats {
        let files = match format.discover_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(agent = %format.kind(), error = %e, "Session discovery failed");
                continue;
            }
        };

        let recent: Vec<SessionLogFile> = files
            .into_iter()
            .filter(|f| f.modified_at >= since)
            .collect();

        for file in recent {
            match MetricsSession::parse(format.as_ref(), file.path.clone()) {
                Ok(session) if !session.events.is_empty() => sessions.push(session),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "Skipping unreadable log");
                }
            }
        }
    }

    tracing::debug!(sessions = sessions.len(), "Loaded metrics sessions");
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClaudeCodeFormat, CodexFormat};
    use crate::types::TurnKind;
    use std::io::Write;

    #[test]
    fn test_parse_orders_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let mut f = File::create(&path).unwrap();
        for (ty, ts) in [
            ("assistant", "2025-11-25T10:05:00Z"),
            ("user", "2025-11-25T10:00:00Z"),
        ] {
            let content = if ty == "user" {
                serde_json::json!("do it")
            } else {
                serde_json::json!([{"type": "text", "text": "done"}])
            };
            writeln!(
                f,
                "{}",
                serde_json::json!({"type": ty, "timestamp": ts, "message": {"content": content}})
            )
            .unwrap();
        }
        writeln!(f, "not json at all").unwrap();

        let format = ClaudeCodeFormat::with_root(dir.path().to_path_buf());
        let session = MetricsSession::parse(&format, path).unwrap();
        assert_eq!(session.id, "s");
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[0].kind, TurnKind::User);
        assert_eq!(session.last_event().unwrap().kind, TurnKind::Assistant);
    }

    #[test]
    fn test_narration_before_tool_call_is_not_a_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let mut f = File::create(&path).unwrap();
        let lines = [
            serde_json::json!({"type": "user", "timestamp": "2025-11-25T10:00:00Z",
                "message": {"content": "bump the version"}}),
            serde_json::json!({"type": "assistant", "timestamp": "2025-11-25T10:00:05Z",
                "message": {"id": "msg_1", "content": [{"type": "text", "text": "Opening Cargo.toml."}]}}),
            serde_json::json!({"type": "assistant", "timestamp": "2025-11-25T10:00:06Z",
                "message": {"id": "msg_1", "stop_reason": "tool_use",
                    "content": [{"type": "tool_use", "id": "t1", "name": "Edit", "input": {}}]}}),
            serde_json::json!({"type": "user", "timestamp": "2025-11-25T10:00:09Z",
                "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok"}]}}),
            serde_json::json!({"type": "assistant", "timestamp": "2025-11-25T10:04:00Z",
                "message": {"id": "msg_2", "stop_reason": "end_turn",
                    "content": [{"type": "text", "text": "Bumped to 0.2.0."}]}}),
        ];
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }

        let format = ClaudeCodeFormat::with_root(dir.path().to_path_buf());
        let session = MetricsSession::parse(&format, path).unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[0].kind, TurnKind::User);
        assert_eq!(session.events[1].kind, TurnKind::Assistant);
        assert_eq!(
            session.events[1].timestamp.to_rfc3339(),
            "2025-11-25T10:04:00+00:00"
        );
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let formats: Vec<Arc<dyn AgentLogFormat>> = vec![
            Arc::new(ClaudeCodeFormat::with_root(PathBuf::from("/nonexistent/claude"))),
            Arc::new(CodexFormat::with_root(PathBuf::from("/nonexistent/codex"))),
        ];
        assert!(load_sessions(&formats, DateTime::<Utc>::from(std::time::UNIX_EPOCH)).is_empty());
    }
}
