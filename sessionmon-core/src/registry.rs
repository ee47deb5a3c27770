//! Thread-safe store of tracked sessions
//!
//! The registry owns every [`Session`] and the read cursor of every file that
//! feeds one. Sessions are held as `Arc<Session>` and replaced copy-on-write,
//! so a snapshot handed to a reader never changes underneath it: a batch of
//! appended commands is either entirely visible in a snapshot or not at all.
//!
//! [`SessionRegistry::sessions`] returns sessions sorted by last activity
//! (most recent first). The sorted view is cached and rebuilt only after a
//! mutation.

use crate::assemble::{apply_increment, latest_mtime, unseen_entries, AssembledSession};
use crate::ingest::ReadResult;
use crate::types::{is_active_at, CommandEntry, FileCursor, Session, SessionMetadata};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by main transcript path
    sessions: HashMap<PathBuf, Arc<Session>>,
    /// Next read position for every tracked file, main or subagent
    cursors: HashMap<PathBuf, FileCursor>,
    /// Subagent transcript -> main transcript
    subagents: HashMap<PathBuf, PathBuf>,
    /// Sorted view; `None` after any mutation
    sorted: Option<Vec<Arc<Session>>>,
}

impl Inner {
    fn invalidate(&mut self) {
        self.sorted = None;
    }

    fn rebuild_sorted(&mut self) -> Vec<Arc<Session>> {
        let mut sorted: Vec<_> = self.sessions.values().cloned().collect();
        sorted.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        self.sorted = Some(sorted.clone());
        sorted
    }

    fn owner_of(&self, path: &Path) -> Option<PathBuf> {
        if self.sessions.contains_key(path) {
            return Some(path.to_path_buf());
        }
        self.subagents.get(path).cloned()
    }
}

/// Commands appended to a session by one registry update.
#[derive(Debug, Clone)]
pub struct Appended {
    pub session: Arc<Session>,
    pub commands: Vec<CommandEntry>,
}

/// Store of all known sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().sessions.is_empty()
    }

    /// Session whose main transcript is `main_log`.
    pub fn get(&self, main_log: &Path) -> Option<Arc<Session>> {
        self.read().sessions.get(main_log).cloned()
    }

    /// Find a session by id. Ids are unique per root, so with several roots
    /// the most recently active match wins.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions().into_iter().find(|s| s.id == id)
    }

    /// True if `path` is a tracked main or subagent transcript.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.read().cursors.contains_key(path)
    }

    /// Main transcript that `path` feeds, if tracked.
    pub fn owner_of(&self, path: &Path) -> Option<PathBuf> {
        self.read().owner_of(path)
    }

    pub fn cursor(&self, path: &Path) -> Option<FileCursor> {
        self.read().cursors.get(path).copied()
    }

    /// Main transcript paths of all tracked sessions.
    pub fn main_logs(&self) -> Vec<PathBuf> {
        self.read().sessions.keys().cloned().collect()
    }

    /// Tracked subagent transcripts with their cursors.
    pub fn subagent_cursors(&self) -> Vec<(PathBuf, FileCursor)> {
        let inner = self.read();
        inner
            .subagents
            .keys()
            .filter_map(|path| Some((path.clone(), *inner.cursors.get(path)?)))
            .collect()
    }

    /// Register an assembled session. Returns `None` if its main transcript
    /// is already tracked, leaving the existing session untouched.
    pub fn insert(&self, assembled: AssembledSession) -> Option<Arc<Session>> {
        let AssembledSession {
            session,
            main_cursor,
            subagents,
        } = assembled;

        let mut inner = self.write();
        if inner.sessions.contains_key(&session.file_path) {
            return None;
        }

        let main_log = session.file_path.clone();
        for (sub_path, cursor) in subagents {
            inner.subagents.insert(sub_path.clone(), main_log.clone());
            inner.cursors.insert(sub_path, cursor);
        }
        inner.cursors.insert(main_log.clone(), main_cursor);

        let session = Arc::new(session);
        inner.sessions.insert(main_log, Arc::clone(&session));
        inner.invalidate();
        Some(session)
    }

    /// Apply an incremental read of `path` that started at `from`.
    ///
    /// The stored cursor always advances to the read's end cursor. If another
    /// update moved the cursor since `from` was taken, the read is stale and
    /// dropped. Returns the appended commands when there were any.
    pub fn apply_read(
        &self,
        path: &Path,
        from: FileCursor,
        read: ReadResult,
        now: DateTime<Utc>,
    ) -> Option<Appended> {
        let mut inner = self.write();

        match inner.cursors.get(path) {
            Some(current) if *current == from => {}
            current => {
                tracing::debug!(path = %path.display(), ?current, ?from, "Dropping stale read");
                return None;
            }
        }
        inner.cursors.insert(path.to_path_buf(), read.cursor);

        let owner = inner.owner_of(path)?;
        // only the main transcript describes the session's cwd and branch
        let no_metadata = SessionMetadata::default();
        let metadata = if owner == path { &read.metadata } else { &no_metadata };

        let current = inner.sessions.get(&owner)?;
        let read_count = read.entries.len();
        let entries = unseen_entries(current, read.entries);
        if entries.len() < read_count {
            tracing::debug!(
                path = %path.display(),
                skipped = read_count - entries.len(),
                "Skipped commands already in the session"
            );
        }

        if !entries.is_empty() || current.can_backfill(metadata) {
            // the cached sorted view must let go of the Arc before make_mut
            inner.invalidate();
            let entry = inner.sessions.get_mut(&owner)?;
            apply_increment(Arc::make_mut(entry), &entries, metadata, now);
        }

        if entries.is_empty() {
            return None;
        }
        Some(Appended {
            session: Arc::clone(inner.sessions.get(&owner)?),
            commands: entries,
        })
    }

    /// Start tracking a subagent transcript of `main_log`, read up to `cursor`.
    ///
    /// Returns `None` if the file was already tracked or the session is unknown.
    /// Otherwise returns the session and the commands merged into it (possibly
    /// none).
    pub fn attach_subagent(
        &self,
        sub_path: &Path,
        main_log: &Path,
        read: ReadResult,
        now: DateTime<Utc>,
    ) -> Option<Appended> {
        let mut inner = self.write();
        if inner.cursors.contains_key(sub_path) || !inner.sessions.contains_key(main_log) {
            return None;
        }

        inner
            .subagents
            .insert(sub_path.to_path_buf(), main_log.to_path_buf());
        inner.cursors.insert(sub_path.to_path_buf(), read.cursor);

        let entries = unseen_entries(inner.sessions.get(main_log)?, read.entries);
        inner.invalidate();
        let entry = inner.sessions.get_mut(main_log)?;
        if !entries.is_empty() {
            apply_increment(Arc::make_mut(entry), &entries, &SessionMetadata::default(), now);
        }

        Some(Appended {
            session: Arc::clone(entry),
            commands: entries,
        })
    }

    /// Sessions sorted by last activity, most recent first.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        if let Some(sorted) = &self.read().sorted {
            return sorted.clone();
        }

        let mut inner = self.write();
        // another caller may have rebuilt it while we waited
        if let Some(sorted) = &inner.sorted {
            return sorted.clone();
        }
        inner.rebuild_sorted()
    }

    /// Recompute every session's active flag from file modification times.
    ///
    /// Commands and last activity are left alone. Returns how many sessions
    /// changed state.
    pub fn refresh_activity(&self, now: DateTime<Utc>, window: Duration) -> usize {
        // stat outside the lock
        let files: Vec<(PathBuf, Vec<PathBuf>)> = {
            let inner = self.read();
            let mut by_main: HashMap<&PathBuf, Vec<PathBuf>> =
                inner.sessions.keys().map(|k| (k, Vec::new())).collect();
            for (sub, main) in &inner.subagents {
                if let Some(subs) = by_main.get_mut(main) {
                    subs.push(sub.clone());
                }
            }
            by_main
                .into_iter()
                .map(|(main, subs)| (main.clone(), subs))
                .collect()
        };

        let flags: Vec<(PathBuf, bool)> = files
            .into_iter()
            .filter_map(|(main, subs)| {
                let paths = std::iter::once(main.as_path()).chain(subs.iter().map(PathBuf::as_path));
                let mtime = latest_mtime(paths)?;
                Some((main, is_active_at(mtime, now, window)))
            })
            .collect();

        let mut inner = self.write();
        let mut changed = 0;
        for (main, active) in flags {
            if let Some(entry) = inner.sessions.get_mut(&main) {
                if entry.is_active != active {
                    Arc::make_mut(entry).is_active = active;
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            inner.invalidate();
            tracing::debug!(changed, "Refreshed session activity");
        }
        changed
    }
}
