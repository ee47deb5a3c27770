//! Session assembly
//!
//! Builds a [`Session`] from a main transcript and its subagent transcripts,
//! and applies incremental reads to an existing session.

use crate::config::Config;
use crate::error::Result;
use crate::ingest::read_from;
use crate::layout;
use crate::types::{is_active_at, CommandEntry, FileCursor, Session, SessionMetadata};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A freshly assembled session plus the read position of every file in it.
#[derive(Debug, Clone)]
pub struct AssembledSession {
    pub session: Session,
    pub main_cursor: FileCursor,
    /// Subagent transcripts merged into the session, with their cursors
    pub subagents: Vec<(PathBuf, FileCursor)>,
}

/// Modification time of `path`, if it can be read.
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Read a main transcript and its subagents from the start.
///
/// Failing to read the main file is an error. A subagent that cannot be read
/// is left out so a later poll can pick it up.
pub fn assemble_session(
    main_log: &Path,
    origin: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<AssembledSession> {
    let main = read_from(main_log, FileCursor::default(), config)?;
    let main_mtime = file_mtime(main_log).unwrap_or(now);

    let mut commands = main.entries;
    let mut subagents = Vec::new();

    for sub_path in layout::subagent_logs(main_log) {
        match read_from(&sub_path, FileCursor::default(), config) {
            Ok(sub) => {
                commands.extend(sub.entries);
                subagents.push((sub_path, sub.cursor));
            }
            Err(e) => {
                tracing::warn!(path = %sub_path.display(), error = %e, "Skipping unreadable subagent log");
            }
        }
    }

    // stable: equal timestamps keep file order
    commands.sort_by_key(|c| c.timestamp);

    let mut last_activity = main_mtime;
    if let Some(last) = commands.last() {
        last_activity = last_activity.max(last.timestamp);
    }
    if let Some(dir_mtime) = file_mtime(&layout::subagents_dir(main_log)) {
        if dir_mtime > main_mtime {
            last_activity = last_activity.max(dir_mtime);
        }
    }

    let session = Session {
        id: layout::session_id(main_log),
        encoded_project: layout::encoded_project(main_log),
        cwd: main.metadata.cwd,
        file_path: main_log.to_path_buf(),
        git_branch: main.metadata.git_branch,
        last_activity,
        is_active: is_active_at(last_activity, now, config.watch.active_window()),
        commands,
        origin: origin.to_string(),
    };

    tracing::debug!(
        path = %main_log.display(),
        commands = session.commands.len(),
        subagents = subagents.len(),
        "Assembled session"
    );

    Ok(AssembledSession {
        session,
        main_cursor: main.cursor,
        subagents,
    })
}

/// Append newly read entries and backfill missing metadata.
///
/// Entries are appended in the order given. Activity moves to `now` only
/// when there are entries. Returns true if the session changed.
pub fn apply_increment(
    session: &mut Session,
    entries: &[CommandEntry],
    metadata: &SessionMetadata,
    now: DateTime<Utc>,
) -> bool {
    let backfilled = session.backfill(metadata);
    if entries.is_empty() {
        return backfilled;
    }

    session.commands.extend_from_slice(entries);
    session.last_activity = now;
    session.is_active = true;
    true
}

/// Drop entries whose `(uuid, tool name)` key the session already holds.
///
/// A file re-read from the start after truncation yields entries that were
/// merged before; this keeps each key unique within the session.
pub fn unseen_entries(session: &Session, entries: Vec<CommandEntry>) -> Vec<CommandEntry> {
    if entries.is_empty() || session.commands.is_empty() {
        return entries;
    }

    let known: HashSet<(&str, &str)> = session
        .commands
        .iter()
        .map(|c| (c.uuid.as_str(), c.tool_name.as_str()))
        .collect();
    entries
        .into_iter()
        .filter(|e| !known.contains(&(e.uuid.as_str(), e.tool_name.as_str())))
        .collect()
}

/// Most recent modification across a session's files.
pub fn latest_mtime<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<DateTime<Utc>> {
    paths.into_iter().filter_map(file_mtime).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn tool_line(uuid: &str, ts: &str, name: &str, input: serde_json::Value) -> String {
        json!({
            "type": "assistant",
            "timestamp": ts,
            "uuid": uuid,
            "sessionId": "abc",
            "cwd": "/home/me/proj",
            "gitBranch": "main",
            "message": { "content": [{ "type": "tool_use", "id": format!("t-{uuid}"), "name": name, "input": input }] }
        })
        .to_string()
    }

    #[test]
    fn test_assemble_merges_subagents_in_time_order() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("-home-me-proj");
        let subagents = project.join("abc").join("subagents");
        fs::create_dir_all(&subagents).unwrap();

        let main = project.join("abc.jsonl");
        fs::write(
            &main,
            format!(
                "{}\n{}\n",
                tool_line("m1", "2025-06-01T10:00:00Z", "Bash", json!({ "command": "ls" })),
                tool_line("m2", "2025-06-01T10:02:00Z", "Edit", json!({ "file_path": "/a" })),
            ),
        )
        .unwrap();
        fs::write(
            subagents.join("agent-1.jsonl"),
            format!(
                "{}\n",
                tool_line("s1", "2025-06-01T10:01:00Z", "Read", json!({ "file_path": "/b" }))
            ),
        )
        .unwrap();

        let assembled = assemble_session(&main, "local", &Config::default(), Utc::now()).unwrap();
        let s = &assembled.session;

        assert_eq!(s.id, "abc");
        assert_eq!(s.encoded_project, "-home-me-proj");
        assert_eq!(s.project_path(), "/home/me/proj");
        assert_eq!(s.git_branch.as_deref(), Some("main"));
        assert_eq!(s.origin, "local");
        let tools: Vec<_> = s.commands.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["Bash", "Read", "Edit"]);

        assert_eq!(assembled.main_cursor.line, 2);
        assert_eq!(assembled.subagents.len(), 1);
        assert_eq!(assembled.subagents[0].1.line, 1);

        // file was just written, so mtime keeps it active
        assert!(s.is_active);
        assert!(s.last_activity >= file_mtime(&main).unwrap());
    }

    #[test]
    fn test_assemble_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = assemble_session(&tmp.path().join("p/x.jsonl"), "local", &Config::default(), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_increment() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("-p");
        fs::create_dir_all(&project).unwrap();
        let main = project.join("abc.jsonl");
        fs::write(&main, "{\"type\":\"user\"}\n").unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        let mut session = assemble_session(&main, "local", &Config::default(), Utc::now())
            .unwrap()
            .session;
        session.is_active = false;
        assert!(session.cwd.is_none());

        let meta = SessionMetadata {
            git_branch: None,
            cwd: Some("/w".to_string()),
        };
        // metadata alone
        assert!(apply_increment(&mut session, &[], &meta, later));
        assert_eq!(session.cwd.as_deref(), Some("/w"));
        assert!(!session.is_active);

        let entry = CommandEntry {
            timestamp: Utc::now(),
            tool_name: "Bash".to_string(),
            pattern: "Bash(ls:*)".to_string(),
            raw_command: "ls".to_string(),
            session_id: "abc".to_string(),
            uuid: "u".to_string(),
            line_number: 2,
            file_path: main.clone(),
        };
        assert!(apply_increment(&mut session, &[entry.clone()], &SessionMetadata::default(), later));
        assert_eq!(session.commands, vec![entry]);
        assert_eq!(session.last_activity, later);
        assert!(session.is_active);

        assert!(!apply_increment(&mut session, &[], &SessionMetadata::default(), later));
    }
}
