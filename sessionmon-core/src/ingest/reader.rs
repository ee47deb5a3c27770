//! Incremental JSONL reader
//!
//! Reads a session log from a [`FileCursor`] onward and returns the new
//! commands together with the cursor to resume from next time.
//!
//! ## Cursor rules
//!
//! - The cursor only moves past lines that end in `\n`. A trailing line still
//!   being written is left for the next read.
//! - Offsets are exact byte counts, including `\r\n` line endings.
//! - A cursor past the end of the file means the file was truncated or
//!   replaced; reading restarts from the beginning.
//! - Lines longer than [`MAX_LINE_BYTES`] are consumed but not parsed.

use super::record::parse_line;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{CommandEntry, FileCursor, SessionMetadata};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Longest line that will be parsed (2 MiB).
pub const MAX_LINE_BYTES: usize = 2 * 1024 * 1024;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Output of one incremental read.
#[derive(Debug, Default)]
pub struct ReadResult {
    /// New entries in file order, deduplicated by `(uuid, tool_name)`
    pub entries: Vec<CommandEntry>,
    /// First `gitBranch` / `cwd` seen in the lines read
    pub metadata: SessionMetadata,
    /// Where the next read should start
    pub cursor: FileCursor,
    /// Non-fatal problems (oversized or malformed lines, truncation)
    pub warnings: Vec<String>,
}

/// Outcome of pulling one line from a reader.
pub(crate) enum Line {
    /// A newline-terminated line of `consumed` bytes. When `overflow` is set
    /// the line exceeded the limit and the buffer is empty.
    Complete { consumed: u64, overflow: bool },
    /// Bytes without a terminating newline before EOF (left in the buffer).
    Partial,
    Eof,
}

/// Read the next line into `buf`, never buffering more than `limit` bytes.
pub(crate) fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Line> {
    buf.clear();
    let mut consumed: u64 = 0;
    let mut overflow = false;

    loop {
        let (used, done) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(if consumed == 0 { Line::Eof } else { Line::Partial });
            }
            let (used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if !overflow {
                if buf.len() + used > limit {
                    overflow = true;
                    buf.clear();
                } else {
                    buf.extend_from_slice(&available[..used]);
                }
            }
            (used, done)
        };

        reader.consume(used);
        consumed += used as u64;

        if done {
            return Ok(Line::Complete { consumed, overflow });
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`).
pub(crate) fn trim_line(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

pub(crate) fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        Error::Io(io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })
}

/// Read new commands from `path`, starting at `from`.
///
/// Calling again with the returned cursor and no intervening writes yields no
/// entries and the same cursor. Only I/O failures are returned as errors;
/// bad lines are skipped and noted in [`ReadResult::warnings`].
pub fn read_from(path: &Path, from: FileCursor, config: &Config) -> Result<ReadResult> {
    let mut result = ReadResult {
        cursor: from,
        ..Default::default()
    };

    let file = open(path)?;
    let file_size = file.metadata()?.len();

    if from.offset > file_size {
        tracing::warn!(
            path = %path.display(),
            offset = from.offset,
            file_size,
            "File truncated, reading from the beginning"
        );
        result.warnings.push(format!(
            "File truncated: cursor {} > file size {}, starting from beginning",
            from.offset, file_size
        ));
        result.cursor = FileCursor::default();
    }

    if result.cursor.offset == file_size {
        return Ok(result);
    }

    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    if result.cursor.offset > 0 {
        reader.seek(SeekFrom::Start(result.cursor.offset))?;
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut buf = Vec::new();

    loop {
        let (consumed, overflow) = match next_line(&mut reader, &mut buf, MAX_LINE_BYTES)? {
            Line::Complete { consumed, overflow } => (consumed, overflow),
            Line::Partial | Line::Eof => break,
        };

        result.cursor.offset += consumed;
        result.cursor.line += 1;
        let line_number = result.cursor.line;

        if overflow {
            result.warnings.push(format!(
                "Line {line_number}: longer than {MAX_LINE_BYTES} bytes, skipped"
            ));
            continue;
        }

        let line = trim_line(&buf);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let Some(parsed) = parse_line(line, path, line_number, config) else {
            result
                .warnings
                .push(format!("Line {line_number}: JSON parse error"));
            continue;
        };

        result
            .metadata
            .observe(parsed.git_branch.as_deref(), parsed.cwd.as_deref());

        for entry in parsed.commands {
            if seen.insert((entry.uuid.clone(), entry.tool_name.clone())) {
                result.entries.push(entry);
            }
        }
    }

    if !result.warnings.is_empty() {
        tracing::debug!(
            path = %path.display(),
            warnings = result.warnings.len(),
            "Skipped unreadable lines"
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn bash_line(uuid: &str, command: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "timestamp": "2025-06-01T10:00:00Z",
            "uuid": uuid,
            "sessionId": "s1",
            "message": { "content": [
                { "type": "tool_use", "id": format!("t-{uuid}"), "name": "Bash", "input": { "command": command } }
            ]}
        })
        .to_string()
    }

    fn write(file: &mut NamedTempFile, s: &str) {
        file.write_all(s.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn test_next_line_limits() {
        let mut r = Cursor::new(b"abcdef\nxy\nrest".to_vec());
        let mut buf = Vec::new();

        assert!(matches!(
            next_line(&mut r, &mut buf, 4).unwrap(),
            Line::Complete { consumed: 7, overflow: true }
        ));
        assert!(buf.is_empty());

        assert!(matches!(
            next_line(&mut r, &mut buf, 4).unwrap(),
            Line::Complete { consumed: 3, overflow: false }
        ));
        assert_eq!(buf, b"xy\n");

        assert!(matches!(next_line(&mut r, &mut buf, 4).unwrap(), Line::Partial));
        assert!(matches!(next_line(&mut r, &mut buf, 4).unwrap(), Line::Eof));
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"abc\r\n"), b"abc");
        assert_eq!(trim_line(b"abc\n"), b"abc");
        assert_eq!(trim_line(b"abc"), b"abc");
    }

    #[test]
    fn test_read_resumes_from_cursor() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        write(&mut file, &format!("{}\n{}\n", bash_line("a", "ls"), bash_line("b", "pwd")));

        let first = read_from(file.path(), FileCursor::default(), &config).unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.cursor.line, 2);
        assert_eq!(first.cursor.offset, std::fs::metadata(file.path()).unwrap().len());

        // nothing new
        let again = read_from(file.path(), first.cursor, &config).unwrap();
        assert!(again.entries.is_empty());
        assert_eq!(again.cursor, first.cursor);

        write(&mut file, &format!("{}\n", bash_line("c", "cargo test")));
        let third = read_from(file.path(), first.cursor, &config).unwrap();
        assert_eq!(third.entries.len(), 1);
        assert_eq!(third.entries[0].pattern, "Bash(cargo:test:*)");
        assert_eq!(third.entries[0].line_number, 3);
        assert_eq!(third.cursor.line, 3);
    }

    #[test]
    fn test_partial_trailing_line_is_held_back() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        let complete = format!("{}\n", bash_line("a", "ls"));
        let pending = bash_line("b", "pwd");
        write(&mut file, &complete);
        write(&mut file, &pending[..20]);

        let first = read_from(file.path(), FileCursor::default(), &config).unwrap();
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.cursor.offset, complete.len() as u64);

        write(&mut file, &format!("{}\n", &pending[20..]));
        let second = read_from(file.path(), first.cursor, &config).unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].raw_command, "pwd");
        assert_eq!(second.entries[0].line_number, 2);
    }

    #[test]
    fn test_truncated_file_restarts() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        write(&mut file, &format!("{}\n", bash_line("a", "ls")));

        let result = read_from(file.path(), FileCursor::new(1_000_000, 50), &config).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.cursor.line, 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_bad_lines_are_skipped_and_duplicates_dropped() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        write(
            &mut file,
            &format!(
                "{}\nnot json\n\n{}\r\n{}\n",
                bash_line("a", "ls"),
                bash_line("a", "ls"),
                bash_line("b", "pwd")
            ),
        );

        let result = read_from(file.path(), FileCursor::default(), &config).unwrap();
        let commands: Vec<_> = result.entries.iter().map(|e| e.raw_command.as_str()).collect();
        assert_eq!(commands, vec!["ls", "pwd"]);
        assert_eq!(result.cursor.line, 5);
        assert_eq!(result.entries[1].line_number, 5);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_oversized_line_is_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        let huge = "x".repeat(MAX_LINE_BYTES + 10);
        write(&mut file, &format!("{huge}\n{}\n", bash_line("a", "ls")));

        let result = read_from(file.path(), FileCursor::default(), &config).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].line_number, 2);
        assert_eq!(result.cursor.line, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = read_from(Path::new("/nonexistent/x.jsonl"), FileCursor::default(), &Config::default());
        assert!(matches!(err, Err(Error::Io(_))));
    }
}
