//! On-demand lookup of a command's full tool input and result
//!
//! [`CommandEntry`](crate::types::CommandEntry) keeps only a display string.
//! When a UI wants the details it calls [`fetch_tool_input`] with the entry's
//! file, line number, tool name and uuid.

use super::reader::{next_line, open, trim_line, Line, MAX_LINE_BYTES};
use super::record::{ContentBlock, RawRecord};
use crate::error::{Error, Result};
use crate::format::truncate_with_ellipsis;
use serde::Serialize;
use std::io::BufReader;
use std::path::Path;

/// How many lines after the tool call are searched for its result.
const RESULT_LOOKAHEAD_LINES: usize = 10;

/// Raw JSON results that are not text are cut to this many characters.
const MAX_RAW_RESULT_CHARS: usize = 2000;

/// Full details of one tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInput {
    /// The tool's `input` object exactly as logged
    pub raw: serde_json::Value,
    pub tool_name: String,
    /// `tool_use` id linking the call to its result
    pub tool_use_id: String,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    /// Text of the matching `tool_result`, if one was found nearby
    pub result: Option<String>,
    pub is_error: bool,
}

impl ToolInput {
    /// Look up a top-level input field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.raw.get(name)
    }
}

/// Locate the tool call at `line_number` (1-indexed) in `path`, falling back
/// to a scan for `uuid` when the line no longer holds it.
pub fn fetch_tool_input(
    path: &Path,
    line_number: usize,
    tool_name: &str,
    uuid: &str,
) -> Result<ToolInput> {
    if let Some(found) = scan(path, tool_name, uuid, Some(line_number))? {
        return Ok(found);
    }

    tracing::debug!(
        path = %path.display(),
        line_number,
        uuid,
        "Tool call not at recorded line, scanning file"
    );

    scan(path, tool_name, uuid, None)?.ok_or_else(|| Error::ToolNotFound {
        tool: tool_name.to_string(),
        uuid: uuid.to_string(),
    })
}

/// Single pass over the file. With `at_line` only that line is tried.
fn scan(path: &Path, tool_name: &str, uuid: &str, at_line: Option<usize>) -> Result<Option<ToolInput>> {
    let mut reader = BufReader::new(open(path)?);
    let mut buf = Vec::new();
    let mut line_number = 0;
    let mut found: Option<ToolInput> = None;
    let mut lookahead = 0;

    loop {
        let last = match next_line(&mut reader, &mut buf, MAX_LINE_BYTES)? {
            Line::Eof => break,
            Line::Partial => true,
            Line::Complete { overflow: true, .. } => {
                line_number += 1;
                continue;
            }
            Line::Complete { .. } => false,
        };
        line_number += 1;
        let line = trim_line(&buf);

        match found.as_mut() {
            None => {
                if at_line.map_or(true, |n| n == line_number) {
                    found = match_tool_use(line, tool_name, uuid);
                }
                match &found {
                    Some(input) if input.tool_use_id.is_empty() => break,
                    None if at_line.is_some_and(|n| line_number >= n) => return Ok(None),
                    _ => {}
                }
            }
            Some(input) => {
                if attach_result(input, line) {
                    break;
                }
                lookahead += 1;
                if lookahead >= RESULT_LOOKAHEAD_LINES {
                    break;
                }
            }
        }

        if last {
            break;
        }
    }

    Ok(found)
}

fn match_tool_use(line: &[u8], tool_name: &str, uuid: &str) -> Option<ToolInput> {
    let record = RawRecord::from_line(line)?;
    if !uuid.is_empty() && record.uuid.as_deref() != Some(uuid) {
        return None;
    }

    let found = record.blocks().find_map(|block| match block {
        ContentBlock::ToolUse { id, name, input } if name == tool_name => Some(ToolInput {
            raw: input,
            tool_name: name,
            tool_use_id: id,
            cwd: record.cwd.clone().filter(|s| !s.is_empty()),
            git_branch: record.git_branch.clone().filter(|s| !s.is_empty()),
            result: None,
            is_error: false,
        }),
        _ => None,
    });
    found
}

/// Fill in the result if `line` carries the matching `tool_result`.
fn attach_result(input: &mut ToolInput, line: &[u8]) -> bool {
    let Some(record) = RawRecord::from_line(line) else {
        return false;
    };

    for block in record.blocks() {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = block
        {
            if tool_use_id == input.tool_use_id {
                let text = result_text(&content);
                input.is_error = is_error || looks_like_error(&text);
                input.result = Some(text);
                return true;
            }
        }
    }
    false
}

/// Readable text of a `tool_result` content value.
fn result_text(content: &serde_json::Value) -> String {
    use serde_json::Value;

    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(Value::is_object) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => truncate_with_ellipsis(&other.to_string(), MAX_RAW_RESULT_CHARS),
    }
}

fn looks_like_error(text: &str) -> bool {
    if text.len() < 5 {
        return false;
    }
    let head: String = text.chars().take(100).collect::<String>().to_lowercase();
    head.starts_with("error") || head.starts_with("failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tool_use(uuid: &str, id: &str, name: &str, input: serde_json::Value) -> String {
        json!({
            "type": "assistant",
            "uuid": uuid,
            "cwd": "/w",
            "gitBranch": "main",
            "message": { "content": [{ "type": "tool_use", "id": id, "name": name, "input": input }] }
        })
        .to_string()
    }

    fn tool_result(id: &str, content: serde_json::Value, is_error: bool) -> String {
        json!({
            "type": "user",
            "uuid": format!("r-{id}"),
            "message": { "content": [{ "type": "tool_result", "tool_use_id": id, "content": content, "is_error": is_error }] }
        })
        .to_string()
    }

    fn file_with(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_fetch_at_recorded_line() {
        let file = file_with(&[
            tool_use("u1", "t1", "Bash", json!({ "command": "ls -la" })),
            tool_result("t1", json!("file1\nfile2"), false),
        ]);

        let input = fetch_tool_input(file.path(), 1, "Bash", "u1").unwrap();
        assert_eq!(input.field("command"), Some(&json!("ls -la")));
        assert_eq!(input.tool_use_id, "t1");
        assert_eq!(input.cwd.as_deref(), Some("/w"));
        assert_eq!(input.git_branch.as_deref(), Some("main"));
        assert_eq!(input.result.as_deref(), Some("file1\nfile2"));
        assert!(!input.is_error);
    }

    #[test]
    fn test_fetch_falls_back_to_uuid_scan() {
        let file = file_with(&[
            json!({ "type": "user", "message": { "content": "hi" } }).to_string(),
            tool_use("u2", "t2", "Edit", json!({ "file_path": "/a.rs" })),
            tool_result(
                "t2",
                json!([{ "type": "text", "text": "Error: no match" }, { "type": "text", "text": "more" }]),
                false,
            ),
        ]);

        // stale line number
        let input = fetch_tool_input(file.path(), 1, "Edit", "u2").unwrap();
        assert_eq!(input.result.as_deref(), Some("Error: no match\nmore"));
        assert!(input.is_error);
    }

    #[test]
    fn test_result_error_flag() {
        let file = file_with(&[
            tool_use("u1", "t1", "Bash", json!({ "command": "false" })),
            tool_result("t1", json!("exit 1"), true),
        ]);
        let input = fetch_tool_input(file.path(), 1, "Bash", "u1").unwrap();
        assert!(input.is_error);
    }

    #[test]
    fn test_result_outside_lookahead_is_not_found() {
        let mut lines = vec![tool_use("u1", "t1", "Bash", json!({ "command": "sleep 1" }))];
        for i in 0..RESULT_LOOKAHEAD_LINES {
            lines.push(json!({ "type": "progress", "n": i }).to_string());
        }
        lines.push(tool_result("t1", json!("done"), false));
        let file = file_with(&lines);

        let input = fetch_tool_input(file.path(), 1, "Bash", "u1").unwrap();
        assert_eq!(input.result, None);
    }

    #[test]
    fn test_not_found() {
        let file = file_with(&[tool_use("u1", "t1", "Bash", json!({ "command": "ls" }))]);
        let err = fetch_tool_input(file.path(), 1, "Read", "u1").unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }

    #[test]
    fn test_result_text_shapes() {
        assert_eq!(result_text(&serde_json::Value::Null), "");
        assert_eq!(result_text(&json!("plain")), "plain");
        assert_eq!(result_text(&json!([{ "type": "image" }])), "");
        assert_eq!(result_text(&json!({ "k": 1 })), r#"{"k":1}"#);
        let long = json!({ "k": "v".repeat(3000) });
        assert!(result_text(&long).ends_with("..."));
    }

    #[test]
    fn test_looks_like_error() {
        assert!(looks_like_error("ERROR: boom"));
        assert!(looks_like_error("Failed to open"));
        assert!(!looks_like_error("fail"));
        assert!(!looks_like_error("all good"));
    }
}
