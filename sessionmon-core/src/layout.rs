//! On-disk layout of a Claude projects root
//!
//! ```text
//! <root>/
//!   <encoded-project>/
//!     <session-id>.jsonl                  main transcript
//!     <session-id>/
//!       subagents/
//!         <anything>.jsonl                subagent transcript
//! ```
//!
//! Classification works on path shape alone so it can be applied to paths
//! from filesystem events that may already be gone.

use std::path::{Path, PathBuf};

pub const SUBAGENTS_DIR: &str = "subagents";
pub const LOG_EXTENSION: &str = "jsonl";

/// Where a path sits relative to a projects root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Root,
    ProjectDir,
    /// `<project>/<session-id>/`, parent of `subagents/`
    SessionDir,
    SubagentDir,
    MainLog,
    SubagentLog,
    Other,
}

impl PathKind {
    /// Directories that get a notification watch.
    pub fn is_watched_dir(self) -> bool {
        matches!(
            self,
            PathKind::Root | PathKind::ProjectDir | PathKind::SessionDir | PathKind::SubagentDir
        )
    }
}

/// Classify `path` against `root`. Paths outside `root` are [`PathKind::Other`].
pub fn classify(root: &Path, path: &Path) -> PathKind {
    let Ok(rel) = path.strip_prefix(root) else {
        return PathKind::Other;
    };
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str()).collect();

    match parts.as_slice() {
        [] => PathKind::Root,
        [_] if !is_jsonl(path) => PathKind::ProjectDir,
        [_, _] if is_jsonl(path) => PathKind::MainLog,
        [_, _] => PathKind::SessionDir,
        [_, _, sub] if *sub == SUBAGENTS_DIR => PathKind::SubagentDir,
        [_, _, sub, _] if *sub == SUBAGENTS_DIR && is_jsonl(path) => PathKind::SubagentLog,
        _ => PathKind::Other,
    }
}

pub fn is_jsonl(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == LOG_EXTENSION)
}

/// Session id of a main transcript: the file stem.
pub fn session_id(main_log: &Path) -> String {
    main_log
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Name of the encoded project directory holding a main transcript.
pub fn encoded_project(main_log: &Path) -> String {
    main_log
        .parent()
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<project>/<session-id>/` for a main transcript.
pub fn session_dir(main_log: &Path) -> PathBuf {
    main_log.with_extension("")
}

/// `<project>/<session-id>/subagents/` for a main transcript.
pub fn subagents_dir(main_log: &Path) -> PathBuf {
    session_dir(main_log).join(SUBAGENTS_DIR)
}

/// Main transcript for a `<project>/<session-id>/` directory.
pub fn main_log_for_session_dir(session_dir: &Path) -> Option<PathBuf> {
    let id = session_dir.file_name()?.to_string_lossy();
    Some(session_dir.parent()?.join(format!("{id}.{LOG_EXTENSION}")))
}

/// Main transcript owning a subagent transcript, if the path has that shape.
pub fn main_log_for_subagent(subagent_log: &Path) -> Option<PathBuf> {
    let subagents = subagent_log.parent()?;
    if subagents.file_name()? != SUBAGENTS_DIR {
        return None;
    }
    main_log_for_session_dir(subagents.parent()?)
}

/// Immediate subdirectories of a root. Missing roots yield nothing.
pub fn project_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// `*.jsonl` files directly inside `dir`, sorted.
pub fn jsonl_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*.{LOG_EXTENSION}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );

    match glob::glob(&pattern) {
        Ok(entries) => entries.flatten().filter(|p| p.is_file()).collect(),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "Invalid glob pattern");
            Vec::new()
        }
    }
}

/// Subagent transcripts of a main transcript.
pub fn subagent_logs(main_log: &Path) -> Vec<PathBuf> {
    jsonl_files(&subagents_dir(main_log))
}
