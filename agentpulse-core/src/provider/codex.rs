//! OpenAI Codex CLI log format
//!
//! Session logs live in `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`. Every
//! line is an envelope `{timestamp, type, payload}`; the first is normally a
//! `session_meta` record carrying the session's system instructions.
//!
//! # Classification
//!
//! - `response_item` messages with role `user` are user turns, unless the CLI
//!   injected them (environment context, AGENTS.md, shell command echoes) or
//!   they repeat the session's own instructions.
//! - `response_item` messages with role `assistant`, `event_msg` records of
//!   type `task_complete`, `turn_aborted` or `context_compacted`, and
//!   `compacted` records are assistant turns.
//! - Everything else (tool calls, reasoning, token counts, the `event_msg`
//!   copy of user input) is ignored.

use crate::provider::format::{
    clip_message, parse_timestamp, AgentLogFormat, ClassifyContext, LineClass,
};
use crate::types::AgentKind;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Upper bound on the bytes read when looking for `session_meta`.
const MAX_META_LINE_BYTES: u64 = 1024 * 1024;

/// OpenAI Codex CLI log format.
pub struct CodexFormat {
    root: Option<PathBuf>,
}

impl CodexFormat {
    /// Create a format with the default root path (~/.codex).
    pub fn new() -> Self {
        Self {
            root: Some(crate::config::home_dir().join(".codex")),
        }
    }

    /// Create a format with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root: Some(root) }
    }
}

impl Default for CodexFormat {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Helper functions
// ============================================

/// Detect system-injected context patterns in "user" role messages.
///
/// These are messages sent as "user" role but are actually CLI/system context,
/// not something the operator typed.
fn is_system_injected_context(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("<environment_context>")
        || trimmed.starts_with("<user_shell_command>")
        || trimmed.starts_with("<INSTRUCTIONS>")
        || trimmed.starts_with("<user_instructions>")
        || trimmed.starts_with("<system")
        || trimmed.starts_with("# AGENTS.md instructions for")
}

/// The session's instructions echoed back as a user message.
fn repeats_instructions(text: &str, ctx: &ClassifyContext) -> bool {
    match ctx.instructions.as_deref().map(str::trim) {
        Some(instructions) if !instructions.is_empty() => {
            text == instructions || text.contains(instructions)
        }
        _ => false,
    }
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Top-level event container for Codex JSONL records.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    payload: serde_json::Value,
}

/// Session metadata payload (first record in file).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SessionMetaPayload {
    instructions: Option<String>,
    base_instructions: Option<BaseInstructions>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BaseInstructions {
    text: Option<String>,
}

/// Event message payload subtypes.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventMsgPayload {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

/// Response item payload subtypes.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseItemPayload {
    #[serde(rename = "type")]
    item_type: Option<String>,
    role: Option<String>,
    content: Option<Vec<ContentBlock>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

impl ResponseItemPayload {
    fn text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(|block| match block {
                ContentBlock::InputText { text }
                | ContentBlock::OutputText { text }
                | ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unknown => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn classify_response_item(
    payload: serde_json::Value,
    at: chrono::DateTime<chrono::Utc>,
    ctx: &ClassifyContext,
) -> LineClass {
    let item: ResponseItemPayload = serde_json::from_value(payload).unwrap_or_default();
    if item.item_type.as_deref() != Some("message") {
        return LineClass::Ignored;
    }

    match item.role.as_deref() {
        Some("assistant") => LineClass::AssistantTurn { at, message_id: None },
        Some("user") => {
            let text = item.text();
            let trimmed = text.trim();
            if trimmed.is_empty()
                || is_system_injected_context(trimmed)
                || repeats_instructions(trimmed, ctx)
            {
                LineClass::Ignored
            } else {
                LineClass::UserTurn {
                    at,
                    text: clip_message(trimmed),
                }
            }
        }
        _ => LineClass::Ignored,
    }
}

impl AgentLogFormat for CodexFormat {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn root_path(&self) -> Option<PathBuf> {
        self.root.clone()
    }

    fn log_root(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join("sessions"))
    }

    fn source_patterns(&self) -> Vec<String> {
        vec!["sessions/*/*/*/rollout-*.jsonl".to_string()]
    }

    fn matches_process(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        name == "codex" || name.starts_with("codex-")
    }

    fn classify_line(&self, line: &[u8], ctx: &ClassifyContext) -> LineClass {
        let event: RawEvent = match serde_json::from_slice(line) {
            Ok(e) => e,
            Err(_) => return LineClass::Ignored,
        };

        let Some(at) = event.timestamp.as_deref().and_then(parse_timestamp) else {
            return LineClass::Ignored;
        };

        match event.event_type.as_deref() {
            Some("response_item") => classify_response_item(event.payload, at, ctx),
            Some("event_msg") => {
                let msg: EventMsgPayload =
                    serde_json::from_value(event.payload).unwrap_or_default();
                match msg.msg_type.as_deref() {
                    Some("task_complete") | Some("turn_aborted") | Some("context_compacted") => {
                        LineClass::AssistantTurn { at, message_id: None }
                    }
                    _ => LineClass::Ignored,
                }
            }
            Some("compacted") => LineClass::AssistantTurn { at, message_id: None },
            _ => LineClass::Ignored,
        }
    }

    /// Reads the session instructions from the leading `session_meta` record.
    fn classify_context(&self, path: &Path) -> ClassifyContext {
        let Ok(file) = File::open(path) else {
            return ClassifyContext::default();
        };

        let mut first_line = Vec::new();
        let mut reader = BufReader::new(file.take(MAX_META_LINE_BYTES));
        if reader.read_until(b'\n', &mut first_line).is_err() {
            return ClassifyContext::default();
        }

        let Ok(event) = serde_json::from_slice::<RawEvent>(&first_line) else {
            return ClassifyContext::default();
        };
        if event.event_type.as_deref() != Some("session_meta") {
            return ClassifyContext::default();
        }

        let meta: SessionMetaPayload = serde_json::from_value(event.payload).unwrap_or_default();
        let instructions = meta
            .instructions
            .or_else(|| meta.base_instructions.and_then(|b| b.text))
            .filter(|s| !s.trim().is_empty());

        ClassifyContext { instructions }
    }
}
