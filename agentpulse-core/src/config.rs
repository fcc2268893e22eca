//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentpulse/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentpulse/` (~/.config/agentpulse/)
//! - State/Logs: `$XDG_STATE_HOME/agentpulse/` (~/.local/state/agentpulse/)
//!
//! The server discovery record also lives in the config directory so other
//! local tools can find a running instance without knowing its port.

use crate::error::{Error, Result};
use crate::types::WindowKey;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Log root overrides and process discovery tuning
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Status poll cycle
    #[serde(default)]
    pub status: StatusConfig,

    /// Metrics aggregation
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Local API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Override paths for agent log roots
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// Override path for Claude Code data (default ~/.claude)
    pub claude_code_path: Option<PathBuf>,
    /// Override path for Codex data (default ~/.codex)
    pub codex_path: Option<PathBuf>,
    /// Seconds before a cached pid → log file mapping is re-resolved
    #[serde(default = "default_path_refresh_secs")]
    pub path_refresh_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            claude_code_path: None,
            codex_path: None,
            path_refresh_secs: default_path_refresh_secs(),
        }
    }
}

fn default_path_refresh_secs() -> u64 {
    10
}

/// Status poll cycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Also re-evaluate when files under the log roots change
    #[serde(default = "default_true")]
    pub watch_filesystem: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            watch_filesystem: true,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Metrics aggregation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Idle percentage at or above which a timeseries step counts as "idle over threshold"
    #[serde(default = "default_idle_threshold_percent")]
    pub idle_threshold_percent: f64,

    /// Timeseries step in seconds
    #[serde(default = "default_step_seconds")]
    pub step_seconds: u64,

    /// How long a computed summary is served from cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Window tracked by new live connections
    #[serde(default)]
    pub default_window: WindowKey,

    /// Rework detection thresholds
    #[serde(default)]
    pub rework: ReworkConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            idle_threshold_percent: default_idle_threshold_percent(),
            step_seconds: default_step_seconds(),
            cache_ttl_secs: default_cache_ttl_secs(),
            default_window: WindowKey::default(),
            rework: ReworkConfig::default(),
        }
    }
}

fn default_idle_threshold_percent() -> f64 {
    80.0
}

fn default_step_seconds() -> u64 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    5
}

/// Thresholds for flagging a new assignment as rework of a completed task.
///
/// These are heuristics; tune them per team rather than treating the
/// defaults as exact.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReworkConfig {
    /// Max seconds between a completion and the re-prompt
    #[serde(default = "default_rework_window_secs")]
    pub window_secs: i64,

    /// Shared significant tokens that alone qualify as a restatement
    #[serde(default = "default_min_shared_tokens")]
    pub min_shared_tokens: usize,

    /// Overlap of the smaller token set that qualifies as a restatement
    #[serde(default = "default_min_overlap_ratio")]
    pub min_overlap_ratio: f64,
}

impl Default for ReworkConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rework_window_secs(),
            min_shared_tokens: default_min_shared_tokens(),
            min_overlap_ratio: default_min_overlap_ratio(),
        }
    }
}

fn default_rework_window_secs() -> i64 {
    600
}

fn default_min_shared_tokens() -> usize {
    3
}

fn default_min_overlap_ratio() -> f64 {
    0.4
}

/// Local API server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Start the API server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First port to try on 127.0.0.1
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of consecutive ports to try before giving up
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,

    /// Seconds between snapshot pushes on a live connection
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,

    /// Directory holding the dashboard's static assets
    pub static_dir: Option<PathBuf>,

    /// Override for the discovery record location
    pub discovery_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            max_port_attempts: default_max_port_attempts(),
            push_interval_secs: default_push_interval_secs(),
            static_dir: None,
            discovery_path: None,
        }
    }
}

impl ServerConfig {
    /// Where the discovery record is written.
    pub fn discovery_path(&self) -> PathBuf {
        self.discovery_path
            .clone()
            .unwrap_or_else(Config::discovery_path)
    }
}

fn default_port() -> u16 {
    7879
}

fn default_max_port_attempts() -> u16 {
    10
}

fn default_push_interval_secs() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.status.poll_interval_ms == 0 {
            return Err(Error::Config(
                "status.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.metrics.idle_threshold_percent) {
            return Err(Error::Config(
                "metrics.idle_threshold_percent must be between 0 and 100".to_string(),
            ));
        }
        if self.metrics.step_seconds == 0 {
            return Err(Error::Config(
                "metrics.step_seconds must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.metrics.rework.min_overlap_ratio) {
            return Err(Error::Config(
                "metrics.rework.min_overlap_ratio must be between 0 and 1".to_string(),
            ));
        }
        if self.server.max_port_attempts == 0 {
            return Err(Error::Config(
                "server.max_port_attempts must be at least 1".to_string(),
            ));
        }
        if self.server.push_interval_secs == 0 {
            return Err(Error::Config(
                "server.push_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/agentpulse/config.toml` (~/.config/agentpulse/config.toml)
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Returns the config directory path
    ///
    /// `$XDG_CONFIG_HOME/agentpulse/` (~/.config/agentpulse/)
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("agentpulse")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/agentpulse/` (~/.local/state/agentpulse/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentpulse")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/agentpulse/agentpulse.log` (~/.local/state/agentpulse/agentpulse.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("agentpulse.log")
    }

    /// Returns the discovery record path
    ///
    /// `$XDG_CONFIG_HOME/agentpulse/server.json`
    pub fn discovery_path() -> PathBuf {
        Self::config_dir().join("server.json")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
