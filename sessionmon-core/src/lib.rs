//! # sessionmon-core
//!
//! Core library for sessionmon, a live monitor of Claude Code sessions.
//!
//! This library provides:
//! - Command pattern extraction (`git push --force` → `Bash(git:push:*)`)
//! - Incremental parsing of JSONL session logs
//! - Session assembly, including subagent transcripts
//! - A filesystem watcher that keeps a session registry current
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through four layers:
//! - **Logs:** `<root>/<project>/<session>.jsonl` written by the assistant (read-only)
//! - **Ingest:** lines → [`CommandEntry`] values, resumable from a [`FileCursor`]
//! - **Registry:** [`Session`] aggregates behind a reader/writer lock
//! - **Watcher:** filesystem events → registry updates → [`WatchEvent`]s
//!
//! ## Example
//!
//! ```rust,no_run
//! use sessionmon_core::{Config, SessionWatcher, WatchRoot};
//! use std::sync::Arc;
//!
//! let config = Arc::new(Config::load().expect("failed to load config"));
//! let watcher = SessionWatcher::new(vec![WatchRoot::local(Config::claude_projects_dir())], config)
//!     .expect("failed to create watcher");
//!
//! for session in watcher.discover() {
//!     println!("{} {} ({} commands)", session.id, session.project_path(), session.commands.len());
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{fetch_tool_input, read_from, ReadResult, ToolInput};
pub use pattern::{aggregate_patterns, extract_pattern};
pub use registry::SessionRegistry;
pub use types::*;
pub use watcher::{SessionWatcher, WatchEvent, WatchRoot, LOCAL_ORIGIN};

// Public modules
pub mod assemble;
pub mod config;
pub mod devagent;
pub mod error;
pub mod format;
pub mod ingest;
pub mod layout;
pub mod logging;
pub mod pattern;
pub mod registry;
pub mod types;
pub mod watcher;
