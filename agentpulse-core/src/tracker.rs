//! Incremental tail classification of one session log.
//!
//! A [`SessionTracker`] remembers how far into its log it has classified and
//! what the newest user and assistant turns were. Each refresh scans only the
//! bytes appended since the previous one, walking **backwards** in fixed-size
//! chunks so that a multi-megabyte log costs one chunk read when the newest
//! turns sit near its end.
//!
//! # Scan invariants
//!
//! - Lines are classified newest-first; the first user turn and the first
//!   assistant turn met are the newest ones and the scan stops once both
//!   are known.
//! - A line split across a chunk boundary is carried over and classified
//!   whole.
//! - `resume_offset` always sits just past a newline, so a line still being
//!   written is re-read on the next refresh.
//! - A file that shrank is a new session: all state is reset.
//! - An assistant turn whose message id reappears on a newer tool call line
//!   is narration, not a completion, and is skipped. When an append voids the
//!   turn the tracker already holds, the whole file is rescanned.

use crate::provider::format::{AgentLogFormat, ClassifyContext, LineClass};
use crate::types::{AgentKind, AgentState, TurnKind, TurnState};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Bytes read per backward step.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Tail-classification state for one live agent's log file.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    path: PathBuf,
    last_known_size: u64,
    resume_offset: u64,
    last_user_at: Option<DateTime<Utc>>,
    last_assistant_at: Option<DateTime<Utc>>,
    last_assistant_message_id: Option<String>,
    last_turn: Option<TurnKind>,
    last_user_message: Option<String>,
    session_started_at: Option<DateTime<Utc>>,
    context: ClassifyContext,
    chunk_size: usize,
}

/// What one backward scan found, newest first.
#[derive(Debug, Default)]
struct ScanFindings {
    last_turn: Option<TurnKind>,
    user: Option<(DateTime<Utc>, String)>,
    assistant: Option<(DateTime<Utc>, Option<String>)>,
    /// Message ids seen on tool call lines
    tool_calls: HashSet<String>,
    /// Absolute offset just past the last newline in the scanned region
    resume_offset: Option<u64>,
}

impl ScanFindings {
    fn observe(&mut self, class: LineClass) {
        match class {
            LineClass::UserTurn { at, text } => {
                self.last_turn.get_or_insert(TurnKind::User);
                if self.user.is_none() {
                    self.user = Some((at, text));
                }
            }
            LineClass::AssistantTurn { at, message_id } => {
                if message_id
                    .as_ref()
                    .is_some_and(|id| self.tool_calls.contains(id))
                {
                    return;
                }
                self.last_turn.get_or_insert(TurnKind::Assistant);
                if self.assistant.is_none() {
                    self.assistant = Some((at, message_id));
                }
            }
            LineClass::ToolCall {
                message_id: Some(id),
            } => {
                self.tool_calls.insert(id);
            }
            LineClass::ToolCall { message_id: None } | LineClass::Ignored => {}
        }
    }

    fn complete(&self) -> bool {
        self.user.is_some() && self.assistant.is_some()
    }

    fn voids(&self, message_id: Option<&str>) -> bool {
        message_id.is_some_and(|id| self.tool_calls.contains(id))
    }
}

impl SessionTracker {
    /// Start tracking `path`. Nothing is read until [`Self::refresh`].
    pub fn new(path: PathBuf, format: &dyn AgentLogFormat) -> Self {
        let session_started_at = format.session_started_at(&path);
        Self {
            path,
            last_known_size: 0,
            resume_offset: 0,
            last_user_at: None,
            last_assistant_at: None,
            last_assistant_message_id: None,
            last_turn: None,
            last_user_message: None,
            session_started_at,
            context: ClassifyContext::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the backward read size (tests use tiny chunks to force
    /// boundary handling).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_turn(&self) -> Option<TurnKind> {
        self.last_turn
    }

    pub fn last_user_at(&self) -> Option<DateTime<Utc>> {
        self.last_user_at
    }

    pub fn last_assistant_at(&self) -> Option<DateTime<Utc>> {
        self.last_assistant_at
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.last_user_message.as_deref()
    }

    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    /// Bring the tracker up to date with the file on disk.
    ///
    /// Returns `Ok(false)` when the file was unchanged and nothing was read.
    /// Errors mean the file could not be opened or read; state is untouched.
    pub fn refresh(&mut self, format: &dyn AgentLogFormat) -> io::Result<bool> {
        let size = std::fs::metadata(&self.path)?.len();

        if size == self.last_known_size && self.last_turn.is_some() {
            return Ok(false);
        }

        if size < self.last_known_size {
            tracing::debug!(
                path = %self.path.display(),
                old_size = self.last_known_size,
                new_size = size,
                "Log shrank, treating as new session"
            );
            self.reset(format);
        }

        if self.last_known_size == 0 {
            self.context = format.classify_context(&self.path);
        }

        let start = self.resume_offset.min(size);
        let mut file = File::open(&self.path)?;
        let mut findings = self.scan_backward(&mut file, start, size, format)?;

        if start > 0 && findings.voids(self.last_assistant_message_id.as_deref()) {
            tracing::debug!(
                path = %self.path.display(),
                "Tracked completion was followed by a tool call, rescanning"
            );
            self.clear_turns();
            findings = self.scan_backward(&mut file, 0, size, format)?;
        }

        if let Some(turn) = findings.last_turn {
            self.last_turn = Some(turn);
        }
        if let Some((at, text)) = findings.user {
            self.last_user_at = Some(at);
            self.last_user_message = Some(text);
        }
        if let Some((at, message_id)) = findings.assistant {
            self.last_assistant_at = Some(at);
            self.last_assistant_message_id = message_id;
        }
        if let Some(offset) = findings.resume_offset {
            self.resume_offset = offset;
        }
        self.last_known_size = size;

        Ok(true)
    }

    fn reset(&mut self, format: &dyn AgentLogFormat) {
        self.last_known_size = 0;
        self.clear_turns();
        self.session_started_at = format.session_started_at(&self.path);
        self.context = ClassifyContext::default();
    }

    fn clear_turns(&mut self) {
        self.resume_offset = 0;
        self.last_user_at = None;
        self.last_assistant_at = None;
        self.last_assistant_message_id = None;
        self.last_turn = None;
        self.last_user_message = None;
    }

    /// Classify lines of `[start, end)` from the end toward `start`.
    fn scan_backward<R: Read + Seek>(
        &self,
        reader: &mut R,
        start: u64,
        end: u64,
        format: &dyn AgentLogFormat,
    ) -> io::Result<ScanFindings> {
        let mut findings = ScanFindings::default();
        let mut pos = end;
        // Tail of a line whose beginning lies before `pos`
        let mut carry: Vec<u8> = Vec::new();

        while pos > start && !findings.complete() {
            let read_len = (pos - start).min(self.chunk_size as u64) as usize;
            pos -= read_len as u64;

            let mut buf = vec![0u8; read_len];
            reader.seek(SeekFrom::Start(pos))?;
            reader.read_exact(&mut buf)?;

            if findings.resume_offset.is_none() {
                if let Some(i) = buf.iter().rposition(|&b| b == b'\n') {
                    findings.resume_offset = Some(pos + i as u64 + 1);
                }
            }

            buf.extend_from_slice(&carry);

            // Unless this chunk reaches the region start, bytes before its
            // first newline belong to a line that began in an earlier chunk.
            let split = if pos == start {
                0
            } else {
                match buf.iter().position(|&b| b == b'\n') {
                    Some(i) => i + 1,
                    None => {
                        carry = buf;
                        continue;
                    }
                }
            };

            for line in buf[split..].split(|&b| b == b'\n').rev() {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                findings.observe(format.classify_line(line, &self.context));
                if findings.complete() {
                    break;
                }
            }

            buf.truncate(split.saturating_sub(1));
            carry = buf;
        }

        Ok(findings)
    }

    /// Public state for this tracker's agent.
    pub fn agent_state(&self, kind: AgentKind, pid: u32) -> AgentState {
        let running = self.last_turn.map(|t| t.is_running()).unwrap_or(false);
        AgentState {
            id: format!("{}-{}", kind, pid),
            kind,
            pid,
            turn_state: if running {
                TurnState::Running
            } else {
                TurnState::Finished
            },
            finished_at: if running { None } else { self.last_assistant_at },
            last_user_at: self.last_user_at,
            last_user_message: self.last_user_message.clone(),
            session_started_at: self.session_started_at,
            log_path: self.path.clone(),
        }
    }
}
