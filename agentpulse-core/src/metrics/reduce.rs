//! Single forward pass over one session's turns.
//!
//! - A **task** opens at a user turn and closes at the next assistant turn.
//!   User turns while a task is open add prompts to it.
//! - Every user turn is an **assignment**.
//! - A user turn arriving after a completion yields a **response**: how long
//!   the agent sat idle before it was given more work.
//! - If that user turn comes within the rework window and restates the
//!   completed task's text, it is **rework** and the task is marked reworked.

use crate::config::ReworkConfig;
use crate::types::{ClassifiedEvent, TurnKind};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStat {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub runtime_secs: f64,
    pub prompts: u32,
    pub reworked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentStat {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStat {
    pub completed_at: DateTime<Utc>,
    /// When the next assignment arrived
    pub at: DateTime<Utc>,
    pub response_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReworkStat {
    pub completed_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

/// All reductions of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub tasks: Vec<TaskStat>,
    pub assignments: Vec<AssignmentStat>,
    pub responses: Vec<ResponseStat>,
    pub reworks: Vec<ReworkStat>,
}

impl SessionStats {
    pub fn extend(&mut self, other: SessionStats) {
        self.tasks.extend(other.tasks);
        self.assignments.extend(other.assignments);
        self.responses.extend(other.responses);
        self.reworks.extend(other.reworks);
    }
}

struct OpenTask {
    start: DateTime<Utc>,
    prompts: u32,
    text: String,
}

struct Completion {
    at: DateTime<Utc>,
    task_index: usize,
    text: String,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

/// Reduce ascending events into task/assignment/response/rework stats.
pub fn reduce_session(events: &[ClassifiedEvent], rework: &ReworkConfig) -> SessionStats {
    let mut stats = SessionStats::default();
    let mut open: Option<OpenTask> = None;
    let mut completion: Option<Completion> = None;

    for event in events {
        match event.kind {
            TurnKind::User => {
                let text = event.text.clone().unwrap_or_default();
                stats.assignments.push(AssignmentStat {
                    at: event.timestamp,
                });

                if let Some(done) = completion.take() {
                    stats.responses.push(ResponseStat {
                        completed_at: done.at,
                        at: event.timestamp,
                        response_secs: seconds_between(done.at, event.timestamp),
                    });

                    let gap = (event.timestamp - done.at).num_seconds();
                    if gap <= rework.window_secs && is_restatement(&done.text, &text, rework) {
                        stats.reworks.push(ReworkStat {
                            completed_at: done.at,
                            at: event.timestamp,
                        });
                        if let Some(task) = stats.tasks.get_mut(done.task_index) {
                            task.reworked = true;
                        }
                    }
                }

                match open.as_mut() {
                    Some(task) => {
                        task.prompts += 1;
                        task.text.push(' ');
                        task.text.push_str(&text);
                    }
                    None => {
                        open = Some(OpenTask {
                            start: event.timestamp,
                            prompts: 1,
                            text,
                        });
                    }
                }
            }
            TurnKind::Assistant => match open.take() {
                Some(task) => {
                    stats.tasks.push(TaskStat {
                        start: task.start,
                        end: event.timestamp,
                        runtime_secs: seconds_between(task.start, event.timestamp),
                        prompts: task.prompts,
                        reworked: false,
                    });
                    completion = Some(Completion {
                        at: event.timestamp,
                        task_index: stats.tasks.len() - 1,
                        text: task.text,
                    });
                }
                None => {
                    // Trailing assistant output moves the idle start later
                    if let Some(done) = completion.as_mut() {
                        done.at = event.timestamp;
                    }
                }
            },
        }
    }

    stats
}

/// Lowercased alphanumeric tokens longer than two characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Whether `next` restates `previous` closely enough to count as rework.
pub fn is_restatement(previous: &str, next: &str, rework: &ReworkConfig) -> bool {
    let a = tokenize(previous);
    let b = tokenize(next);
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let shared = a.intersection(&b).count();
    let smaller = a.len().min(b.len());

    shared >= rework.min_shared_tokens
        || shared as f64 / smaller as f64 >= rework.min_overlap_ratio
}
