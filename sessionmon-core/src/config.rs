//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/sessionmon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/sessionmon/` (~/.config/sessionmon/)
//! - State/Logs: `$XDG_STATE_HOME/sessionmon/` (~/.local/state/sessionmon/)
//!
//! A loaded [`Config`] is passed explicitly to the components that need it
//! (usually behind an `Arc`); nothing in this crate reads configuration from
//! ambient global state.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
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
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Color theme name for the UI (mocha, macchiato, frappe, latte)
    #[serde(default = "default_theme")]
    pub theme: String,

    /// Styling groups for command patterns (checked in order, first match wins)
    #[serde(default = "default_tool_groups")]
    pub tool_groups: Vec<ToolGroup>,

    /// Watcher tuning
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            tool_groups: default_tool_groups(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_theme() -> String {
    "mocha".to_string()
}

/// A named group of command patterns sharing one display style.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolGroup {
    /// Display name of this group
    pub name: String,

    /// Palette color name (e.g. "red", "yellow", "mauve")
    #[serde(default)]
    pub color: String,

    /// Render in bold
    #[serde(default)]
    pub bold: bool,

    /// Patterns belonging to this group; each may contain one `*` wildcard
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Commands matching this group are dropped before they reach a session
    #[serde(default)]
    pub exclude: bool,
}

impl ToolGroup {
    fn new(name: &str, color: &str, bold: bool, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            bold,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            exclude: false,
        }
    }

    /// Returns true if any of this group's patterns matches `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        self.patterns.iter().any(|p| wildcard_match(p, pattern))
    }
}

fn default_tool_groups() -> Vec<ToolGroup> {
    vec![
        ToolGroup::new(
            "dangerous",
            "red",
            true,
            &[
                "Bash(rm:*)",
                "Bash(sudo:*)",
                "Bash(chmod:*)",
                "Bash(chown:*)",
                "Bash(dd:*)",
                "Bash(mkfs:*)",
                "Bash(kill:*)",
                "Bash(pkill:*)",
                "Bash(killall:*)",
            ],
        ),
        ToolGroup::new("write", "peach", false, &["Write", "NotebookEdit"]),
        ToolGroup::new("edit", "yellow", false, &["Edit"]),
        ToolGroup::new("bash", "mauve", false, &["Bash(*)"]),
        ToolGroup::new("task", "lavender", false, &["Task", "TaskOutput"]),
        ToolGroup::new(
            "read-only",
            "green",
            false,
            &[
                "Read",
                "Glob",
                "Grep",
                "WebFetch",
                "WebSearch",
                "TodoRead",
                "AskUserQuestion",
                "mcp__*",
            ],
        ),
        ToolGroup::new("unmatched", "overlay1", false, &["*"]),
    ]
}

/// Matches `value` against `pattern`, where `pattern` may contain a single
/// `*` that stands for any (possibly empty) run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }

    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            value.len() >= prefix.len() + suffix.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix)
        }
        None => false,
    }
}

/// Watcher and session-activity tuning
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Additional projects directories to monitor besides `~/.claude/projects`
    #[serde(default)]
    pub projects_dirs: Vec<PathBuf>,

    /// A session counts as active if touched within this many seconds
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,

    /// How often to re-glob `subagents/` directories for missed files
    #[serde(default = "default_subagent_poll_secs")]
    pub subagent_poll_secs: u64,

    /// How often the watch loop recomputes active flags
    #[serde(default = "default_activity_refresh_secs")]
    pub activity_refresh_secs: u64,

    /// Capacity of the change-event channel (events beyond it are dropped)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of the error channel (errors beyond it are dropped)
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            projects_dirs: vec![],
            active_window_secs: default_active_window_secs(),
            subagent_poll_secs: default_subagent_poll_secs(),
            activity_refresh_secs: default_activity_refresh_secs(),
            event_buffer: default_event_buffer(),
            error_buffer: default_error_buffer(),
        }
    }
}

impl WatchConfig {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn subagent_poll_interval(&self) -> Duration {
        Duration::from_secs(self.subagent_poll_secs.max(1))
    }

    pub fn activity_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.activity_refresh_secs.max(1))
    }
}

fn default_active_window_secs() -> u64 {
    5 * 60
}

fn default_subagent_poll_secs() -> u64 {
    2
}

fn default_activity_refresh_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    100
}

fn default_error_buffer() -> usize {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
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

        Ok(config)
    }

    /// Returns the first tool group whose patterns match `pattern`.
    pub fn tool_group(&self, pattern: &str) -> Option<&ToolGroup> {
        self.tool_groups.iter().find(|g| g.matches(pattern))
    }

    /// Returns true if `pattern` belongs to a group marked `exclude`.
    pub fn should_exclude(&self, pattern: &str) -> bool {
        self.tool_group(pattern).is_some_and(|g| g.exclude)
    }

    /// Returns true if commands with this pattern should be tracked at all.
    pub fn should_include(&self, pattern: &str) -> bool {
        !self.should_exclude(pattern)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/sessionmon/config.toml` (~/.config/sessionmon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("sessionmon").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/sessionmon/` (~/.local/state/sessionmon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("sessionmon")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/sessionmon/sessionmon.log` (~/.local/state/sessionmon/sessionmon.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("sessionmon.log")
    }

    /// Returns the local Claude Code projects directory (`~/.claude/projects`)
    pub fn claude_projects_dir() -> PathBuf {
        home_dir().join(".claude").join("projects")
    }
}
