//! Ingestion layer for Claude Code JSONL logs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  *.jsonl files  │ ──► │   read_from      │ ──► │ Vec<CommandEntry│
//! │ (~/.claude/...) │     │  (FileCursor)    │     │  + metadata     │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  parse_line          │
//!                    │  └─ extract_pattern  │
//!                    └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sessionmon_core::{Config, FileCursor};
//! use sessionmon_core::ingest::read_from;
//! use std::path::Path;
//!
//! let config = Config::default();
//! let path = Path::new("/home/me/.claude/projects/-home-me-proj/abc.jsonl");
//!
//! let first = read_from(path, FileCursor::default(), &config)?;
//! // later, only lines appended since the first read
//! let more = read_from(path, first.cursor, &config)?;
//! println!("{} new commands", more.entries.len());
//! # Ok::<(), sessionmon_core::Error>(())
//! ```

mod reader;
mod record;
mod tool_input;

pub use reader::{read_from, ReadResult, MAX_LINE_BYTES};
pub use record::{parse_line, ParsedLine};
pub use tool_input::{fetch_tool_input, ToolInput};
