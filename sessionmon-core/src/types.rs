//! Core domain types for sessionmon
//!
//! These types describe what the monitor knows about assistant sessions.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One conversation transcript (`<session-id>.jsonl`) plus its subagent transcripts |
//! | **Subagent transcript** | `<session-id>/subagents/*.jsonl`, merged into the parent's timeline |
//! | **Command** | One `tool_use` item from an assistant turn ([`CommandEntry`]) |
//! | **Pattern** | Normalized shape of a command used for grouping, e.g. `Bash(git:push:*)` |
//! | **Origin** | Label of the watched root a session was found under (`local`, `devagent:<name>`) |

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

// ============================================
// Session
// ============================================

/// A tracked assistant session.
///
/// Sessions are owned by the [`SessionRegistry`](crate::registry::SessionRegistry);
/// everything else sees them through `Arc<Session>` snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Session UUID taken from the file name
    pub id: String,
    /// Name of the encoded project directory the file lives in
    pub encoded_project: String,
    /// Working directory recorded in the log, once one has been seen
    pub cwd: Option<String>,
    /// Full path to the main `.jsonl` file
    pub file_path: PathBuf,
    /// First non-empty git branch seen in the log
    pub git_branch: Option<String>,
    /// Most recent activity (file mtime or command timestamp)
    pub last_activity: DateTime<Utc>,
    /// All commands in chronological order
    pub commands: Vec<CommandEntry>,
    /// True if any contributing file changed within the active window
    pub is_active: bool,
    /// Label of the watched root this session came from
    pub origin: String,
}

impl Session {
    /// Best available project path: the logged working directory, or the
    /// encoded directory name when the log never recorded one.
    pub fn project_path(&self) -> &str {
        self.cwd.as_deref().unwrap_or(&self.encoded_project)
    }

    /// True if [`backfill`](Session::backfill) would change anything.
    pub fn can_backfill(&self, meta: &SessionMetadata) -> bool {
        (self.cwd.is_none() && meta.cwd.is_some())
            || (self.git_branch.is_none() && meta.git_branch.is_some())
    }

    /// Fill in metadata the session does not have yet. Existing values win.
    ///
    /// Returns true if anything changed.
    pub fn backfill(&mut self, meta: &SessionMetadata) -> bool {
        let mut changed = false;
        if self.cwd.is_none() && meta.cwd.is_some() {
            self.cwd = meta.cwd.clone();
            changed = true;
        }
        if self.git_branch.is_none() && meta.git_branch.is_some() {
            self.git_branch = meta.git_branch.clone();
            changed = true;
        }
        changed
    }
}

/// Session-level metadata found while reading a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

impl SessionMetadata {
    /// Record `git_branch` / `cwd` unless a value was already captured.
    pub fn observe(&mut self, git_branch: Option<&str>, cwd: Option<&str>) {
        if self.git_branch.is_none() {
            self.git_branch = git_branch.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if self.cwd.is_none() {
            self.cwd = cwd.filter(|s| !s.is_empty()).map(str::to_string);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.git_branch.is_none() && self.cwd.is_none()
    }
}

/// Returns true if `last_activity` falls strictly inside `window` before `now`.
///
/// A timestamp exactly `window` old is inactive.
pub fn is_active_at(last_activity: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match chrono::Duration::from_std(window) {
        Ok(window) => now.signed_duration_since(last_activity) < window,
        Err(_) => true,
    }
}

// ============================================
// Commands
// ============================================

/// A single tool invocation extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEntry {
    /// When the assistant issued the call
    pub timestamp: DateTime<Utc>,
    /// Tool name as logged ("Bash", "Edit", "Read", "mcp__...")
    pub tool_name: String,
    /// Normalized pattern, e.g. `Bash(git:commit:*)` or `Edit`
    pub pattern: String,
    /// Command text for shell tools, file path for file tools, best effort otherwise
    pub raw_command: String,
    /// Session UUID as recorded on the line
    pub session_id: String,
    /// Message UUID, half of the deduplication key
    pub uuid: String,
    /// 1-indexed line in `file_path`, used to lazily re-fetch details
    pub line_number: usize,
    /// File the entry was read from (main or subagent transcript)
    pub file_path: PathBuf,
}

/// Aggregate of all commands sharing one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandPattern {
    pub pattern: String,
    /// Tool name of the first command seen with this pattern
    pub tool_name: String,
    pub count: usize,
    pub last_seen: DateTime<Utc>,
    /// Up to five distinct raw commands, in order of first appearance
    pub examples: Vec<String>,
}

// ============================================
// Read cursors
// ============================================

/// Position reached in a JSONL file: the byte offset of the next unread line
/// and the number of lines consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FileCursor {
    pub offset: u64,
    pub line: usize,
}

impl FileCursor {
    pub fn new(offset: u64, line: usize) -> Self {
        Self { offset, line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            id: "abc".to_string(),
            encoded_project: "-home-me-proj".to_string(),
            cwd: None,
            file_path: PathBuf::from("/root/-home-me-proj/abc.jsonl"),
            git_branch: None,
            last_activity: Utc::now(),
            commands: vec![],
            is_active: true,
            origin: "local".to_string(),
        }
    }

    #[test]
    fn test_project_path_falls_back_to_encoded_dir() {
        let mut s = session();
        assert_eq!(s.project_path(), "-home-me-proj");
        s.cwd = Some("/home/me/proj".to_string());
        assert_eq!(s.project_path(), "/home/me/proj");
    }

    #[test]
    fn test_backfill_keeps_existing_values() {
        let mut s = session();
        s.git_branch = Some("main".to_string());

        let meta = SessionMetadata {
            git_branch: Some("feature".to_string()),
            cwd: Some("/home/me/proj".to_string()),
        };
        assert!(s.backfill(&meta));
        assert_eq!(s.git_branch.as_deref(), Some("main"));
        assert_eq!(s.cwd.as_deref(), Some("/home/me/proj"));

        // second pass changes nothing
        assert!(!s.backfill(&meta));
    }

    #[test]
    fn test_metadata_first_non_empty_wins() {
        let mut meta = SessionMetadata::default();
        meta.observe(Some(""), None);
        assert!(meta.is_empty());
        meta.observe(Some("main"), Some("/a"));
        meta.observe(Some("dev"), Some("/b"));
        assert_eq!(meta.git_branch.as_deref(), Some("main"));
        assert_eq!(meta.cwd.as_deref(), Some("/a"));
    }

    #[test]
    fn test_active_window_boundaries() {
        let now = Utc::now();
        let window = Duration::from_secs(300);
        assert!(is_active_at(now - chrono::Duration::minutes(4), now, window));
        assert!(!is_active_at(now - chrono::Duration::minutes(6), now, window));
        assert!(!is_active_at(now - chrono::Duration::minutes(5), now, window));
        assert!(is_active_at(now + chrono::Duration::seconds(10), now, window));
    }
}
