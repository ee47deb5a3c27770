//! sessionmon - headless monitor for Claude Code sessions
//!
//! Discovers session logs, prints a snapshot as JSON lines, then streams
//! change events until Ctrl-C.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use sessionmon_core::{
    aggregate_patterns, devagent, fetch_tool_input, format, logging, CommandEntry, Config,
    Session, SessionWatcher, WatchEvent, WatchRoot,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often devagent environments are re-listed when following them.
const DEVAGENT_REFRESH: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sessionmon")]
#[command(about = "Monitor Claude Code session logs and stream command activity")]
#[command(version)]
struct Args {
    /// Projects directory to watch (repeatable; default: ~/.claude/projects)
    #[arg(long = "projects-dir", value_name = "PATH")]
    projects_dirs: Vec<PathBuf>,

    /// Also watch Claude logs of devagent containers
    #[arg(long)]
    follow_devagent: bool,

    /// Print the session snapshot and exit
    #[arg(long)]
    once: bool,

    /// Print the command patterns of one session and exit
    #[arg(long, value_name = "SESSION_ID", conflicts_with = "detail")]
    patterns: Option<String>,

    /// Print the full tool input of a session's n-th command (1-indexed) and exit
    #[arg(long, num_args = 2, value_names = ["SESSION_ID", "N"])]
    detail: Option<Vec<String>>,

    /// Compact JSON output (default: pretty for single documents)
    #[arg(long)]
    compact: bool,
}

/// One line of the session snapshot
#[derive(Serialize)]
struct SessionSummary<'a> {
    id: &'a str,
    project: &'a str,
    origin: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_branch: Option<&'a str>,
    commands: usize,
    active: bool,
    last_activity: DateTime<Utc>,
    last_activity_ago: String,
}

impl<'a> SessionSummary<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            id: &session.id,
            project: session.project_path(),
            origin: &session.origin,
            git_branch: session.git_branch.as_deref(),
            commands: session.commands.len(),
            active: session.is_active,
            last_activity: session.last_activity,
            last_activity_ago: format::relative_time(session.last_activity),
        }
    }
}

/// One line of the event stream
#[derive(Serialize)]
struct EventLine<'a> {
    event: &'static str,
    session: SessionSummary<'a>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    commands: &'a [CommandEntry],
}

impl<'a> EventLine<'a> {
    fn new(event: &'a WatchEvent) -> Self {
        let commands: &[CommandEntry] = match event {
            WatchEvent::Discovered(_) => &[],
            WatchEvent::NewCommands { commands, .. } => commands,
        };
        Self {
            event: event.kind(),
            session: SessionSummary::new(event.session()),
            commands,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("Failed to load config")?;
    let _guard = logging::init(&config.logging).context("Failed to initialize logging")?;
    let config = Arc::new(config);

    let mut roots: Vec<WatchRoot> = if args.projects_dirs.is_empty() {
        std::iter::once(Config::claude_projects_dir())
            .chain(config.watch.projects_dirs.iter().cloned())
            .map(WatchRoot::local)
            .collect()
    } else {
        args.projects_dirs.iter().cloned().map(WatchRoot::local).collect()
    };

    if args.follow_devagent {
        match devagent::discover().await {
            Ok(envs) => roots.extend(envs.iter().map(devagent::Environment::watch_root)),
            Err(e) => {
                tracing::warn!(error = %e, "devagent discovery failed, watching local roots only");
                eprintln!("warning: {e}");
            }
        }
    }

    tracing::info!(roots = roots.len(), "Starting sessionmon");

    let mut watcher =
        SessionWatcher::new(roots, Arc::clone(&config)).context("Failed to create watcher")?;
    let sessions = watcher.discover();

    if let Some(id) = &args.patterns {
        let session = find(&watcher, id)?;
        return print_document(&aggregate_patterns(&session.commands), args.compact);
    }

    if let Some(detail) = &args.detail {
        let (id, n) = match detail.as_slice() {
            [id, n] => (id, n),
            _ => bail!("--detail takes a session id and a command number"),
        };
        let n: usize = n.parse().with_context(|| format!("Invalid command number: {n}"))?;
        let session = find(&watcher, id)?;
        let Some(command) = n.checked_sub(1).and_then(|i| session.commands.get(i)) else {
            bail!(
                "Session {id} has {} commands, no command #{n}",
                session.commands.len()
            );
        };
        let input = fetch_tool_input(
            &command.file_path,
            command.line_number,
            &command.tool_name,
            &command.uuid,
        )
        .with_context(|| format!("Failed to load tool input for command #{n}"))?;
        return print_document(&input, args.compact);
    }

    for session in &sessions {
        print_line(&SessionSummary::new(session))?;
    }

    if args.once {
        return Ok(());
    }

    stream(&mut watcher, args.follow_devagent).await
}

async fn stream(watcher: &mut SessionWatcher, follow_devagent: bool) -> Result<()> {
    watcher.start().context("Failed to start watcher")?;
    let mut events = watcher
        .take_events()
        .context("Event stream already taken")?;
    let mut errors = watcher
        .take_errors()
        .context("Error stream already taken")?;

    let mut devagent_tick =
        tokio::time::interval_at(tokio::time::Instant::now() + DEVAGENT_REFRESH, DEVAGENT_REFRESH);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_line(&EventLine::new(&event))?;
            }
            Some(err) = errors.recv() => {
                tracing::warn!(error = %err, "Watcher error");
                eprintln!("error: {err}");
            }
            _ = devagent_tick.tick(), if follow_devagent => {
                refresh_devagent_roots(watcher).await;
            }
        }
    }

    let dropped = watcher.dropped_events();
    if dropped > 0 {
        tracing::warn!(dropped, "Events were dropped while the consumer lagged");
    }
    watcher.stop().await;
    Ok(())
}

/// Add roots for containers started since the last listing.
async fn refresh_devagent_roots(watcher: &SessionWatcher) {
    let envs = match devagent::discover().await {
        Ok(envs) => envs,
        Err(e) => {
            tracing::debug!(error = %e, "devagent refresh failed");
            return;
        }
    };

    let added: Vec<String> = envs
        .iter()
        .map(devagent::Environment::watch_root)
        .filter(|root| watcher.add_root(root.clone()))
        .map(|root| root.origin)
        .collect();
    if added.is_empty() {
        return;
    }

    tracing::info!(added = added.len(), "New devagent roots");
    for session in watcher.discover() {
        if added.contains(&session.origin) {
            if let Err(e) = print_line(&SessionSummary::new(&session)) {
                tracing::warn!(error = %e, "Failed to print session");
            }
        }
    }
}

fn find(watcher: &SessionWatcher, id: &str) -> Result<Arc<Session>> {
    watcher
        .find_session(id)
        .with_context(|| format!("Session not found: {id}"))
}

fn print_line<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_document<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{json}");
    Ok(())
}
