//! Claude Code log format
//!
//! Session logs live in `~/.claude/projects/[encoded-path]/*.jsonl`, one JSON
//! record per line.
//!
//! # Classification
//!
//! - `type=user` with real text content is a user turn. Meta records,
//!   sidechain (subagent) records, tool-result-only records, local command
//!   echoes, shell escapes and bootstrap preambles are ignored.
//! - `isCompactSummary` user records, `system` records with subtype
//!   `compact_boundary`, and the "[Request interrupted by user" marker count
//!   as assistant turns: the agent is waiting for input again.
//! - `type=assistant` is an assistant turn unless it consists only of
//!   thinking blocks. A line with a `tool_use` block or a `tool_use` stop
//!   reason is a tool call.
//! - Claude Code writes each content block of one API message as its own
//!   line, all sharing `message.id`. Narration text followed by a tool call
//!   of the same message is not a completion; the tracker and the forward
//!   decode drop such turns by id.

use crate::provider::format::{
    clip_message, parse_timestamp, AgentLogFormat, ClassifyContext, LineClass,
};
use crate::types::AgentKind;
use serde::Deserialize;
use std::path::PathBuf;

/// Claude Code log format.
pub struct ClaudeCodeFormat {
    root: Option<PathBuf>,
}

impl ClaudeCodeFormat {
    /// Create a format with the default root path (~/.claude).
    pub fn new() -> Self {
        Self {
            root: Some(crate::config::home_dir().join(".claude")),
        }
    }

    /// Create a format with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root: Some(root) }
    }
}

impl Default for ClaudeCodeFormat {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefixes of user-role text that the CLI writes on the user's behalf.
const NON_PROMPT_PREFIXES: &[&str] = &[
    "<command-name>",
    "<command-message>",
    "<command-args>",
    "<local-command-stdout>",
    "<local-command-stderr>",
    "<bash-input>",
    "<bash-stdout>",
    "<bash-stderr>",
    "<system-reminder>",
    "Caveat: The messages below were generated by the user while running local commands",
];

const INTERRUPT_MARKER: &str = "[Request interrupted by user";

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Represents a single line from Claude Code JSONL.
///
/// Only the fields that decide turn ownership are decoded.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    subtype: Option<String>,
    timestamp: Option<String>,
    is_sidechain: Option<bool>,
    is_meta: Option<bool>,
    is_compact_summary: Option<bool>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    id: Option<String>,
    stop_reason: Option<String>,
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse,
    #[serde(rename = "tool_result")]
    ToolResult,
    #[serde(rename = "thinking")]
    Thinking,
    #[serde(rename = "redacted_thinking")]
    RedactedThinking,
    // Catch-all for unknown block types (images, documents, ...)
    #[serde(other)]
    Unknown,
}

impl RawContent {
    /// Concatenated text of all text blocks.
    fn text(&self) -> String {
        match self {
            RawContent::Text(s) => s.clone(),
            RawContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn has_tool_use(&self) -> bool {
        matches!(self, RawContent::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse)))
    }

    fn has_tool_result(&self) -> bool {
        matches!(self, RawContent::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult)))
    }

    /// Only thinking blocks (or nothing at all).
    fn is_thinking_only(&self) -> bool {
        match self {
            RawContent::Text(s) => s.trim().is_empty(),
            RawContent::Blocks(blocks) => blocks.iter().all(|b| {
                matches!(b, ContentBlock::Thinking | ContentBlock::RedactedThinking)
            }),
        }
    }
}

fn classify_user(record: &RawRecord, at: chrono::DateTime<chrono::Utc>) -> LineClass {
    if record.is_compact_summary.unwrap_or(false) {
        return LineClass::AssistantTurn {
            at,
            message_id: None,
        };
    }
    if record.is_meta.unwrap_or(false) {
        return LineClass::Ignored;
    }

    let Some(content) = record.message.as_ref().and_then(|m| m.content.as_ref()) else {
        return LineClass::Ignored;
    };

    let text = content.text();
    let trimmed = text.trim();

    if trimmed.starts_with(INTERRUPT_MARKER) {
        return LineClass::AssistantTurn {
            at,
            message_id: None,
        };
    }
    if trimmed.is_empty() {
        // Tool results, images without a caption, empty prompts
        return LineClass::Ignored;
    }
    if content.has_tool_result() {
        return LineClass::Ignored;
    }
    if NON_PROMPT_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return LineClass::Ignored;
    }

    LineClass::UserTurn {
        at,
        text: clip_message(trimmed),
    }
}

fn classify_assistant(record: &RawRecord, at: chrono::DateTime<chrono::Utc>) -> LineClass {
    let Some(message) = record.message.as_ref() else {
        return LineClass::Ignored;
    };
    let Some(content) = message.content.as_ref() else {
        return LineClass::Ignored;
    };

    let message_id = message.id.clone();
    if content.has_tool_use() || message.stop_reason.as_deref() == Some("tool_use") {
        return LineClass::ToolCall { message_id };
    }
    if content.is_thinking_only() {
        return LineClass::Ignored;
    }
    LineClass::AssistantTurn { at, message_id }
}

impl AgentLogFormat for ClaudeCodeFormat {
    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn root_path(&self) -> Option<PathBuf> {
        self.root.clone()
    }

    fn log_root(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join("projects"))
    }

    fn source_patterns(&self) -> Vec<String> {
        vec!["projects/*/*.jsonl".to_string()]
    }

    fn matches_process(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        name == "claude" || name.starts_with("claude-") || name.starts_with("claude.")
    }

    fn classify_line(&self, line: &[u8], _ctx: &ClassifyContext) -> LineClass {
        let record: RawRecord = match serde_json::from_slice(line) {
            Ok(r) => r,
            Err(_) => return LineClass::Ignored,
        };

        let Some(at) = record.timestamp.as_deref().and_then(parse_timestamp) else {
            return LineClass::Ignored;
        };

        if record.is_sidechain.unwrap_or(false) {
            return LineClass::Ignored;
        }

        match record.record_type.as_deref() {
            Some("user") => classify_user(&record, at),
            Some("assistant") => classify_assistant(&record, at),
            Some("system") if record.subtype.as_deref() == Some("compact_boundary") => {
                LineClass::AssistantTurn {
                    at,
                    message_id: None,
                }
            }
            _ => LineClass::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSession;
    use crate::tracker::SessionTracker;
    use crate::types::TurnKind;

    const TS: &str = "2025-11-25T10:00:00.000Z";

    fn classify(json: serde_json::Value) -> LineClass {
        let format = ClaudeCodeFormat::with_root(PathBuf::from("/tmp/claude"));
        format.classify_line(json.to_string().as_bytes(), &ClassifyContext::default())
    }

    fn user(content: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "type": "user",
            "timestamp": TS,
            "message": {"role": "user", "content": content}
        })
    }

    fn assistant(content: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "type": "assistant",
            "timestamp": TS,
            "message": {"role": "assistant", "content": content}
        })
    }

    #[test]
    fn test_plain_user_prompt() {
        match classify(user(serde_json::json!("Fix the failing test\nplease"))) {
            LineClass::UserTurn { text, .. } => assert_eq!(text, "Fix the failing test"),
            other => panic!("expected user turn, got {:?}", other),
        }
    }

    #[test]
    fn test_user_text_blocks() {
        let class = classify(user(serde_json::json!([
            {"type": "text", "text": "Refactor the parser"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "x"}}
        ])));
        assert!(matches!(class, LineClass::UserTurn { ref text, .. } if text == "Refactor the parser"));
    }

    #[test]
    fn test_tool_result_ignored() {
        let class = classify(user(serde_json::json!([
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
        ])));
        assert_eq!(class, LineClass::Ignored);
    }

    #[test]
    fn test_command_echoes_ignored() {
        for text in [
            "<command-name>/clear</command-name>",
            "<local-command-stdout></local-command-stdout>",
            "<bash-input>ls</bash-input>",
            "<bash-stdout>a.txt</bash-stdout>",
            "Caveat: The messages below were generated by the user while running local commands. DO NOT respond.",
        ] {
            assert_eq!(classify(user(serde_json::json!(text))), LineClass::Ignored, "{}", text);
        }
    }

    #[test]
    fn test_meta_and_sidechain_ignored() {
        let mut meta = user(serde_json::json!("hello"));
        meta["isMeta"] = serde_json::json!(true);
        assert_eq!(classify(meta), LineClass::Ignored);

        let mut side = assistant(serde_json::json!([{"type": "text", "text": "done"}]));
        side["isSidechain"] = serde_json::json!(true);
        assert_eq!(classify(side), LineClass::Ignored);
    }

    #[test]
    fn test_interrupt_is_assistant_turn() {
        let class = classify(user(serde_json::json!([
            {"type": "text", "text": "[Request interrupted by user for tool use]"}
        ])));
        assert!(matches!(class, LineClass::AssistantTurn { .. }));
    }

    #[test]
    fn test_compaction_is_assistant_turn() {
        let mut summary = user(serde_json::json!("This session is being continued..."));
        summary["isCompactSummary"] = serde_json::json!(true);
        assert!(matches!(classify(summary), LineClass::AssistantTurn { .. }));

        let boundary = serde_json::json!({
            "type": "system",
            "subtype": "compact_boundary",
            "timestamp": TS,
            "content": "Conversation compacted"
        });
        assert!(matches!(classify(boundary), LineClass::AssistantTurn { .. }));
    }

    #[test]
    fn test_assistant_tool_use_is_tool_call() {
        let class = classify(assistant(serde_json::json!([
            {"type": "text", "text": "Let me look"},
            {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "/a"}}
        ])));
        assert_eq!(class, LineClass::ToolCall { message_id: None });
    }

    /// One API message written as a text line then a tool_use line.
    fn split_message() -> (serde_json::Value, serde_json::Value) {
        let narration = serde_json::json!({
            "type": "assistant",
            "timestamp": TS,
            "message": {
                "id": "msg_1",
                "role": "assistant",
                "stop_reason": null,
                "content": [{"type": "text", "text": "Let me look at the build script."}]
            }
        });
        let tool = serde_json::json!({
            "type": "assistant",
            "timestamp": TS,
            "message": {
                "id": "msg_1",
                "role": "assistant",
                "stop_reason": "tool_use",
                "content": [{"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "make"}}]
            }
        });
        (narration, tool)
    }

    #[test]
    fn test_split_message_blocks_share_id() {
        let (narration, tool) = split_message();
        assert_eq!(
            classify(narration),
            LineClass::AssistantTurn {
                at: parse_timestamp(TS).unwrap(),
                message_id: Some("msg_1".to_string()),
            }
        );
        assert_eq!(
            classify(tool),
            LineClass::ToolCall {
                message_id: Some("msg_1".to_string())
            }
        );
    }

    #[test]
    fn test_tool_use_stop_reason_is_tool_call() {
        let (mut narration, _) = split_message();
        narration["message"]["stop_reason"] = serde_json::json!("tool_use");
        assert_eq!(
            classify(narration),
            LineClass::ToolCall {
                message_id: Some("msg_1".to_string())
            }
        );
    }

    #[test]
    fn test_split_message_keeps_agent_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let (narration, tool) = split_message();
        let lines = [
            user(serde_json::json!("fix the build")),
            narration,
            tool,
            user(serde_json::json!([
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
            ])),
        ];
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        std::fs::write(&path, body).unwrap();

        let format = ClaudeCodeFormat::with_root(dir.path().to_path_buf());
        let mut tracker = SessionTracker::new(path.clone(), &format);
        tracker.refresh(&format).unwrap();
        assert_eq!(tracker.last_turn(), Some(TurnKind::User));
        assert_eq!(tracker.last_user_message(), Some("fix the build"));
        assert!(tracker.last_assistant_at().is_none());

        let session = MetricsSession::parse(&format, path).unwrap();
        assert_eq!(session.events.len(), 1);
        assert_eq!(session.events[0].kind, TurnKind::User);
    }

    #[test]
    fn test_assistant_thinking_only_ignored() {
        let class = classify(assistant(serde_json::json!([
            {"type": "thinking", "thinking": "hmm", "signature": "abc"}
        ])));
        assert_eq!(class, LineClass::Ignored);
    }

    #[test]
    fn test_assistant_text_is_turn() {
        let class = classify(assistant(serde_json::json!([
            {"type": "thinking", "thinking": "hmm", "signature": "abc"},
            {"type": "text", "text": "All tests pass."}
        ])));
        assert!(matches!(class, LineClass::AssistantTurn { .. }));
    }

    #[test]
    fn test_missing_timestamp_or_garbage_ignored() {
        let format = ClaudeCodeFormat::with_root(PathBuf::from("/tmp/claude"));
        let ctx = ClassifyContext::default();
        assert_eq!(format.classify_line(b"{not json", &ctx), LineClass::Ignored);
        assert_eq!(
            format.classify_line(br#"{"type":"user","message":{"content":"hi"}}"#, &ctx),
            LineClass::Ignored
        );
    }

    #[test]
    fn test_process_names() {
        let format = ClaudeCodeFormat::new();
        assert!(format.matches_process("claude"));
        assert!(format.matches_process("Claude"));
        assert!(!format.matches_process("codex"));
        assert!(!format.matches_process("claudette"));
    }

    #[test]
    fn test_owns_path() {
        let format = ClaudeCodeFormat::with_root(PathBuf::from("/home/u/.claude"));
        assert!(format.owns_path(&PathBuf::from("/home/u/.claude/projects/-x/abc.jsonl")));
        assert!(!format.owns_path(&PathBuf::from("/home/u/.claude/projects/-x/abc.json")));
        assert!(!format.owns_path(&PathBuf::from("/home/u/.codex/sessions/abc.jsonl")));
    }

    #[test]
    fn test_source_patterns() {
        let format = ClaudeCodeFormat::new();
        assert_eq!(format.source_patterns(), vec!["projects/*/*.jsonl".to_string()]);
    }
}
