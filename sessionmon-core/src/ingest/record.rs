//! Claude Code JSONL record parsing
//!
//! Decodes one log line into the commands it carries plus any session-level
//! metadata (`cwd`, `gitBranch`) present on the line.
//!
//! Only `"type": "assistant"` records with `tool_use` content blocks produce
//! commands. Records are decoded leniently: missing fields default, unknown
//! content block types are ignored, and a content block that fails to decode
//! is skipped without losing the rest of the line. A line that is not valid
//! JSON at all yields `None`.

use crate::config::Config;
use crate::format::truncate_with_ellipsis;
use crate::pattern::{extract_pattern, SHELL_TOOL};
use crate::types::CommandEntry;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Free-text fields (prompts) are cut to this many characters for display.
const MAX_PROMPT_DISPLAY_CHARS: usize = 100;

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// A single line from a Claude Code JSONL log.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawRecord {
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub timestamp: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
    pub message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawMessage {
    /// A plain string for user prompts, an array of blocks otherwise
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    // text, thinking, image, ...
    #[serde(other)]
    Unknown,
}

impl RawRecord {
    pub(crate) fn from_line(line: &[u8]) -> Option<Self> {
        serde_json::from_slice(line).ok()
    }

    pub(crate) fn is_assistant(&self) -> bool {
        self.record_type.as_deref() == Some("assistant")
    }

    /// Decodable content blocks of the message, in order.
    pub(crate) fn blocks(&self) -> impl Iterator<Item = ContentBlock> + '_ {
        let items = self
            .message
            .as_ref()
            .and_then(|m| m.content.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default();

        items
            .iter()
            .filter_map(|item| ContentBlock::deserialize(item).ok())
    }

    fn emitted_at(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

// ============================================
// Display strings
// ============================================

/// Common input fields probed for a display string.
///
/// Each field decodes on its own: a `null` or non-string value leaves that
/// field empty without discarding the others.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GenericInput {
    #[serde(deserialize_with = "lenient_string")]
    file_path: String,
    #[serde(deserialize_with = "lenient_string")]
    path: String,
    #[serde(deserialize_with = "lenient_string")]
    url: String,
    #[serde(deserialize_with = "lenient_string")]
    command: String,
    #[serde(deserialize_with = "lenient_string")]
    pattern: String,
    #[serde(deserialize_with = "lenient_string")]
    query: String,
    #[serde(deserialize_with = "lenient_string")]
    prompt: String,
    #[serde(deserialize_with = "lenient_string")]
    description: String,
    #[serde(deserialize_with = "lenient_string")]
    skill: String,
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        _ => String::new(),
    })
}

/// Known tool families, each with its own display rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    Shell,
    File,
    Glob,
    Grep,
    Web,
    Task,
    Skill,
    Other,
}

impl ToolKind {
    fn of(tool_name: &str) -> Self {
        match tool_name {
            SHELL_TOOL => ToolKind::Shell,
            "Edit" | "Write" | "NotebookEdit" | "Read" => ToolKind::File,
            "Glob" => ToolKind::Glob,
            "Grep" => ToolKind::Grep,
            "WebFetch" | "WebSearch" => ToolKind::Web,
            "Task" => ToolKind::Task,
            "Skill" => ToolKind::Skill,
            _ => ToolKind::Other,
        }
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

impl GenericInput {
    fn display_string(&self, kind: ToolKind) -> String {
        match kind {
            ToolKind::Shell => self.command.clone(),
            ToolKind::File => self.file_path.clone(),
            ToolKind::Glob => match (self.pattern.is_empty(), self.path.is_empty()) {
                (false, false) => format!("{}/{}", self.path, self.pattern),
                (false, true) => self.pattern.clone(),
                _ => self.path.clone(),
            },
            ToolKind::Grep => match (self.pattern.is_empty(), self.path.is_empty()) {
                (false, false) => format!("{} in {}", self.pattern, self.path),
                (false, true) => self.pattern.clone(),
                _ => self.path.clone(),
            },
            ToolKind::Web => first_non_empty(&[&self.url, &self.query]).to_string(),
            ToolKind::Task => self.description.clone(),
            ToolKind::Skill => self.skill.clone(),
            ToolKind::Other => self.fallback_display(),
        }
    }

    fn fallback_display(&self) -> String {
        let direct = first_non_empty(&[
            &self.file_path,
            &self.path,
            &self.command,
            &self.pattern,
            &self.query,
            &self.url,
            &self.description,
        ]);
        if !direct.is_empty() {
            return direct.to_string();
        }
        if !self.prompt.is_empty() {
            return truncate_with_ellipsis(&self.prompt, MAX_PROMPT_DISPLAY_CHARS);
        }
        self.skill.clone()
    }
}

// ============================================
// Line parsing
// ============================================

/// Everything useful found on one line.
#[derive(Debug, Default)]
pub struct ParsedLine {
    /// Candidate commands, in content-block order, already filtered by config
    pub commands: Vec<CommandEntry>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

/// Parse one JSONL line.
///
/// `line_number` is the 1-indexed line in `path`, stored on every entry so the
/// full tool input can be fetched later. Returns `None` for malformed JSON.
pub fn parse_line(
    line: &[u8],
    path: &Path,
    line_number: usize,
    config: &Config,
) -> Option<ParsedLine> {
    let record = RawRecord::from_line(line)?;

    let mut parsed = ParsedLine {
        commands: Vec::new(),
        git_branch: record.git_branch.clone().filter(|s| !s.is_empty()),
        cwd: record.cwd.clone().filter(|s| !s.is_empty()),
    };

    if !record.is_assistant() {
        return Some(parsed);
    }

    let emitted_at = record.emitted_at();

    for block in record.blocks() {
        let ContentBlock::ToolUse { name, input, .. } = block else {
            continue;
        };

        let generic = GenericInput::deserialize(&input).unwrap_or_default();

        let mut raw_command = generic.display_string(ToolKind::of(&name));
        if raw_command.is_empty() {
            raw_command = name.clone();
        }
        if raw_command.is_empty() {
            continue;
        }

        let pattern = extract_pattern(&name, &generic.command);
        if !config.should_include(&pattern) {
            continue;
        }

        parsed.commands.push(CommandEntry {
            timestamp: emitted_at,
            tool_name: name,
            pattern,
            raw_command,
            session_id: record.session_id.clone().unwrap_or_default(),
            uuid: record.uuid.clone().unwrap_or_default(),
            line_number,
            file_path: path.to_path_buf(),
        });
    }

    Some(parsed)
}
