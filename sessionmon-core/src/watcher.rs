//! Filesystem watch loop
//!
//! [`SessionWatcher`] discovers sessions under one or more projects roots and
//! keeps them current as the assistant appends to its logs.
//!
//! ## Watch set
//!
//! Watches are non-recursive. The watcher subscribes to each root, every
//! project directory, every `<session-id>/` directory (to see `subagents/`
//! appear) and every `subagents/` directory. A root that does not exist yet is
//! covered by watching its parent until it is created.
//!
//! ## Event flow
//!
//! ```text
//! notify callback ──(unbounded)──► watch loop task ──► SessionRegistry
//!                                        │
//!                                        ├──(bounded, lossy)──► WatchEvent receiver
//!                                        └──(bounded, lossy)──► Error receiver
//! ```
//!
//! Registry updates are never dropped. Outward events are best effort: when a
//! receiver falls behind, events are discarded and counted, and the next
//! [`SessionWatcher::sessions`] call still returns the current state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sessionmon_core::{Config, SessionWatcher, WatchRoot};
//! use std::sync::Arc;
//!
//! # async fn run() -> sessionmon_core::Result<()> {
//! let config = Arc::new(Config::load()?);
//! let mut watcher = SessionWatcher::new(vec![WatchRoot::local(Config::claude_projects_dir())], config)?;
//!
//! for session in watcher.discover() {
//!     println!("{} ({} commands)", session.id, session.commands.len());
//! }
//!
//! let mut events = watcher.take_events().expect("first call");
//! watcher.start()?;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.kind(), event.session().id);
//! }
//! # Ok(())
//! # }
//! ```

use crate::assemble::assemble_session;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::{read_from, ReadResult};
use crate::layout::{self, PathKind};
use crate::registry::{Appended, SessionRegistry};
use crate::types::{CommandEntry, FileCursor, Session};
use chrono::Utc;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Origin label of the local `~/.claude/projects` root.
pub const LOCAL_ORIGIN: &str = "local";

/// A projects directory to monitor and the label its sessions carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub origin: String,
}

impl WatchRoot {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(path, LOCAL_ORIGIN)
    }
}

/// Change notification delivered to the UI.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A session appeared after startup discovery
    Discovered(Arc<Session>),
    /// Commands were appended to a session
    NewCommands {
        session: Arc<Session>,
        /// Exactly the entries appended by this update
        commands: Vec<CommandEntry>,
    },
}

impl WatchEvent {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            WatchEvent::Discovered(session) | WatchEvent::NewCommands { session, .. } => session,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Discovered(_) => "discovered",
            WatchEvent::NewCommands { .. } => "new_commands",
        }
    }
}

type FsEvent = notify::Result<notify::Event>;

/// State shared between the handle and the loop task.
struct Shared {
    config: Arc<Config>,
    registry: SessionRegistry,
    roots: RwLock<Vec<WatchRoot>>,
    fs: Mutex<RecommendedWatcher>,
    watched: Mutex<HashSet<PathBuf>>,
    events: mpsc::Sender<WatchEvent>,
    errors: mpsc::Sender<Error>,
    dropped_events: AtomicU64,
}

/// Monitors projects roots and maintains a [`SessionRegistry`].
pub struct SessionWatcher {
    shared: Arc<Shared>,
    fs_rx: Option<mpsc::UnboundedReceiver<FsEvent>>,
    events_rx: Option<mpsc::Receiver<WatchEvent>>,
    errors_rx: Option<mpsc::Receiver<Error>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionWatcher {
    /// Create a watcher for `roots`. Nothing is scanned until [`discover`].
    ///
    /// Fails only if the OS notification backend cannot be initialised.
    ///
    /// [`discover`]: SessionWatcher::discover
    pub fn new(roots: Vec<WatchRoot>, config: Arc<Config>) -> Result<Self> {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let fs = notify::recommended_watcher(move |res: FsEvent| {
            // receiver gone means the loop has stopped
            let _ = fs_tx.send(res);
        })?;

        let (events_tx, events_rx) = mpsc::channel(config.watch.event_buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(config.watch.error_buffer.max(1));
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            config,
            registry: SessionRegistry::new(),
            roots: RwLock::new(Vec::new()),
            fs: Mutex::new(fs),
            watched: Mutex::new(HashSet::new()),
            events: events_tx,
            errors: errors_tx,
            dropped_events: AtomicU64::new(0),
        };
        for root in roots {
            shared.add_root(root);
        }

        Ok(Self {
            shared: Arc::new(shared),
            fs_rx: Some(fs_rx),
            events_rx: Some(events_rx),
            errors_rx: Some(errors_rx),
            shutdown,
            task: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    pub fn roots(&self) -> Vec<WatchRoot> {
        self.shared.roots()
    }

    /// Add a root to monitor. Returns false if its path was already tracked,
    /// in which case only the origin label is updated.
    ///
    /// Call [`discover`](SessionWatcher::discover) afterwards to scan it.
    pub fn add_root(&self, root: WatchRoot) -> bool {
        self.shared.add_root(root)
    }

    /// Scan all roots, register every session not yet tracked and establish
    /// watches. Returns all sessions sorted by last activity.
    ///
    /// Sessions that are already tracked keep their commands and cursors, so
    /// this can be called again after [`add_root`](SessionWatcher::add_root).
    pub fn discover(&self) -> Vec<Arc<Session>> {
        for root in self.shared.roots() {
            self.shared.sync_root(&root, false);
        }
        let sessions = self.shared.registry.sessions();
        tracing::info!(sessions = sessions.len(), "Discovery complete");
        sessions
    }

    /// Spawn the watch loop on the current tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("watch loop needs a tokio runtime: {e}")))?;

        let Some(fs_rx) = self.fs_rx.take() else {
            tracing::warn!("Watch loop already started");
            return Ok(());
        };

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.subscribe();
        self.task = Some(handle.spawn(run_loop(shared, fs_rx, shutdown)));
        tracing::info!("Watch loop started");
        Ok(())
    }

    /// Signal the loop to stop and wait for it. A handler already running is
    /// allowed to finish.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Watch loop task failed");
            }
        }
    }

    /// Receiver of change events. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.events_rx.take()
    }

    /// Receiver of non-fatal errors. Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.errors_rx.take()
    }

    /// Snapshot of all sessions, most recently active first.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.shared.registry.sessions()
    }

    pub fn find_session(&self, id: &str) -> Option<Arc<Session>> {
        self.shared.registry.find_by_id(id)
    }

    /// Recompute active flags from file modification times.
    pub fn refresh_activity_status(&self) -> usize {
        self.shared.refresh_activity_status()
    }

    /// Pick up subagent transcripts the notification backend did not report.
    pub fn scan_for_new_subagents(&self) {
        self.shared.scan_for_new_subagents();
    }

    /// Events discarded because the event receiver was full.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Error to report when adding a watch on `dir` failed. A directory that does
/// not exist (a root not created yet, or one removed meanwhile) is expected;
/// anything else, such as hitting the inotify watch limit, is reported.
fn watch_failure(dir: &Path, error: notify::Error) -> Option<Error> {
    if dir.is_dir() {
        tracing::warn!(dir = %dir.display(), error = %error, "Failed to watch directory");
        Some(Error::Watch(error))
    } else {
        tracing::debug!(dir = %dir.display(), error = %error, "Directory to watch is gone");
        None
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    mut fs_rx: mpsc::UnboundedReceiver<FsEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_period = shared.config.watch.subagent_poll_interval();
    let refresh_period = shared.config.watch.activity_refresh_interval();
    let mut poll = interval_at(Instant::now() + poll_period, poll_period);
    let mut refresh = interval_at(Instant::now() + refresh_period, refresh_period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = fs_rx.recv() => match event {
                Some(Ok(event)) => shared.handle_fs_event(event),
                Some(Err(e)) => shared.report(Error::Watch(e)),
                None => break,
            },
            _ = poll.tick() => shared.scan_for_new_subagents(),
            _ = refresh.tick() => {
                shared.refresh_activity_status();
            }
        }
    }

    tracing::info!("Watch loop stopped");
}

impl Shared {
    fn roots(&self) -> Vec<WatchRoot> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add_root(&self, root: WatchRoot) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = roots.iter_mut().find(|r| r.path == root.path) {
            existing.origin = root.origin;
            return false;
        }
        tracing::info!(path = %root.path.display(), origin = %root.origin, "Added watch root");
        roots.push(root);
        true
    }

    /// Root containing `path`; the deepest one if roots nest.
    fn root_for(&self, path: &Path) -> Option<WatchRoot> {
        self.roots()
            .into_iter()
            .filter(|r| path.starts_with(&r.path))
            .max_by_key(|r| r.path.components().count())
    }

    // ============================================
    // Watch set
    // ============================================

    fn watch_dir(&self, dir: &Path) -> bool {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        if watched.contains(dir) {
            return true;
        }

        let added = self
            .fs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(dir, RecursiveMode::NonRecursive);
        match added {
            Ok(()) => {
                tracing::debug!(dir = %dir.display(), "Watching directory");
                watched.insert(dir.to_path_buf());
                true
            }
            Err(e) => {
                drop(watched);
                if let Some(error) = watch_failure(dir, e) {
                    self.report(error);
                }
                false
            }
        }
    }

    fn watch_dir_if_exists(&self, dir: &Path) {
        if dir.is_dir() {
            self.watch_dir(dir);
        }
    }

    /// Forget a removed directory so it is watched again if re-created.
    fn forget_dir(&self, dir: &Path) {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        if watched.remove(dir) {
            let mut fs = self.fs.lock().unwrap_or_else(PoisonError::into_inner);
            // the backend usually drops the watch itself
            let _ = fs.unwatch(dir);
        }
    }

    // ============================================
    // Scanning
    // ============================================

    fn sync_root(&self, root: &WatchRoot, emit: bool) {
        if !self.watch_dir(&root.path) {
            if let Some(parent) = root.path.parent() {
                self.watch_dir(parent);
            }
            tracing::info!(
                path = %root.path.display(),
                "Projects root not available yet, waiting for it"
            );
            return;
        }

        for project in layout::project_dirs(&root.path) {
            self.sync_project(root, &project, emit);
        }
    }

    fn sync_project(&self, root: &WatchRoot, project: &Path, emit: bool) {
        self.watch_dir(project);
        for main_log in layout::jsonl_files(project) {
            self.sync_main_log(root, &main_log, emit);
        }
    }

    fn sync_main_log(&self, root: &WatchRoot, main_log: &Path, emit: bool) {
        self.watch_dir_if_exists(&layout::session_dir(main_log));
        self.watch_dir_if_exists(&layout::subagents_dir(main_log));

        if self.registry.is_tracked(main_log) {
            return;
        }

        match assemble_session(main_log, &root.origin, &self.config, Utc::now()) {
            Ok(assembled) => {
                if let Some(session) = self.registry.insert(assembled) {
                    tracing::info!(
                        path = %main_log.display(),
                        commands = session.commands.len(),
                        origin = %session.origin,
                        "Tracking session"
                    );
                    if emit {
                        self.emit(WatchEvent::Discovered(session));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %main_log.display(), error = %e, "Skipping session");
                self.report(e);
            }
        }
    }

    fn attach_new_subagents(&self, main_log: &Path) {
        let subagents = layout::subagent_logs(main_log);
        if subagents.is_empty() {
            return;
        }
        self.watch_dir(&layout::subagents_dir(main_log));

        for sub_path in subagents {
            if !self.registry.is_tracked(&sub_path) {
                self.attach_subagent(&sub_path, main_log);
            }
        }
    }

    fn attach_subagent(&self, sub_path: &Path, main_log: &Path) {
        let read = match read_from(sub_path, FileCursor::default(), &self.config) {
            Ok(read) => read,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        if let Some(appended) = self.registry.attach_subagent(sub_path, main_log, read, Utc::now()) {
            tracing::info!(
                path = %sub_path.display(),
                commands = appended.commands.len(),
                "Tracking subagent log"
            );
            self.emit_appended(appended);
        }
    }

    fn scan_for_new_subagents(&self) {
        for main_log in self.registry.main_logs() {
            self.watch_dir_if_exists(&layout::session_dir(&main_log));
            self.attach_new_subagents(&main_log);
        }

        // writes that landed before the subagents/ watch existed
        for (sub_path, cursor) in self.registry.subagent_cursors() {
            let grown = std::fs::metadata(&sub_path).is_ok_and(|m| m.len() != cursor.offset);
            if grown {
                self.read_increment(&sub_path);
            }
        }
    }

    fn refresh_activity_status(&self) -> usize {
        self.registry
            .refresh_activity(Utc::now(), self.config.watch.active_window())
    }

    // ============================================
    // Event handling
    // ============================================

    fn handle_fs_event(&self, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.handle_created(path);
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            // renames: treat the new name like a created path
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in event.paths.iter().filter(|p| p.exists()) {
                    self.handle_created(path);
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.handle_write(path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.forget_dir(path);
                }
            }
            _ => {}
        }
    }

    fn handle_created(&self, path: &Path) {
        let Some(root) = self.root_for(path) else {
            return;
        };
        let kind = layout::classify(&root.path, path);

        if path.is_dir() {
            if !kind.is_watched_dir() {
                return;
            }
            tracing::debug!(path = %path.display(), ?kind, "Directory created");
            match kind {
                PathKind::Root => self.sync_root(&root, true),
                PathKind::ProjectDir => self.sync_project(&root, path, true),
                PathKind::SessionDir => {
                    self.watch_dir(path);
                    if let Some(main_log) = layout::main_log_for_session_dir(path) {
                        self.watch_dir_if_exists(&layout::subagents_dir(&main_log));
                        self.attach_new_subagents(&main_log);
                    }
                }
                PathKind::SubagentDir => {
                    if let Some(main_log) = path.parent().and_then(layout::main_log_for_session_dir) {
                        self.attach_new_subagents(&main_log);
                    }
                }
                _ => {}
            }
            return;
        }

        if self.registry.is_tracked(path) {
            self.read_increment(path);
            return;
        }

        match kind {
            PathKind::MainLog => self.sync_main_log(&root, path, true),
            PathKind::SubagentLog => {
                if let Some(main_log) = layout::main_log_for_subagent(path) {
                    self.watch_dir_if_exists(&layout::subagents_dir(&main_log));
                    self.attach_subagent(path, &main_log);
                }
            }
            _ => {}
        }
    }

    fn handle_write(&self, path: &Path) {
        if !layout::is_jsonl(path) {
            return;
        }
        if self.registry.is_tracked(path) {
            self.read_increment(path);
        } else {
            // the create may have been missed or coalesced
            self.handle_created(path);
        }
    }

    /// Read what was appended to a tracked file since its cursor.
    fn read_increment(&self, path: &Path) {
        let Some(from) = self.registry.cursor(path) else {
            return;
        };

        let read: ReadResult = match read_from(path, from, &self.config) {
            Ok(read) => read,
            Err(e) => {
                // cursor stays put; the next write retries
                tracing::warn!(path = %path.display(), error = %e, "Incremental read failed");
                self.report(e);
                return;
            }
        };

        tracing::trace!(
            path = %path.display(),
            from = from.offset,
            to = read.cursor.offset,
            entries = read.entries.len(),
            "Read increment"
        );

        if let Some(appended) = self.registry.apply_read(path, from, read, Utc::now()) {
            self.emit_appended(appended);
        }
    }

    // ============================================
    // Outward channels
    // ============================================

    fn emit_appended(&self, appended: Appended) {
        if appended.commands.is_empty() {
            return;
        }
        self.emit(WatchEvent::NewCommands {
            session: appended.session,
            commands: appended.commands,
        });
    }

    fn emit(&self, event: WatchEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let count = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                if count == 1 || count % 100 == 0 {
                    tracing::warn!(
                        dropped_total = count,
                        "Event channel full, event dropped (registry is still current)"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Event receiver closed");
            }
        }
    }

    fn report(&self, error: Error) {
        tracing::debug!(error = %error, "Reporting watch error");
        if let Err(mpsc::error::TrySendError::Full(_)) = self.errors.try_send(error) {
            tracing::warn!("Error channel full, error dropped");
        }
    }
}
