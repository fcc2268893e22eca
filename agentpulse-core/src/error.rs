//! Error types for agentpulse-core

use thiserror::Error;

/// Main error type for the agentpulse-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error for agent logs
    #[error("parse error in {agent} log: {message}")]
    Parse { agent: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Every port in the retry range was unavailable
    #[error("no free port in {start}..{end} after {attempts} attempts")]
    PortExhausted { start: u16, end: u32, attempts: u16 },

    /// Filesystem watcher error
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

/// Result type alias for agentpulse-core
pub type Result<T> = std::result::Result<T, Error>;
